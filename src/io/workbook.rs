//! Minimal spreadsheet loader for ODS and XLSX containers.
//!
//! Only cell values are read: no styles, formulas or merged-cell geometry. Both formats
//! are zip archives holding XML parts, decoded with `quick-xml`.

use std::collections::HashMap;
use std::io::{Cursor, Read, Seek};

use chrono::{Duration, NaiveDate, NaiveDateTime};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use zip::result::ZipError;
use zip::ZipArchive;

use crate::error::{Error, Result};
use crate::io::common::parse_datetime;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Cell {
    #[default]
    Empty,
    Text(String),
    Number(f64),
}

impl Cell {
    /// Text as displayed; numbers are formatted with `to_string`.
    pub fn as_text(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(s) => s.trim().to_string(),
            Cell::Number(v) => v.to_string(),
        }
    }

    /// Numeric value; text cells are parsed.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Empty => None,
            Cell::Text(s) => s.trim().parse().ok(),
            Cell::Number(v) => Some(*v),
        }
    }

    /// Timestamp from a serial day number or a date/time string.
    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Cell::Empty => None,
            Cell::Text(s) => parse_datetime(s),
            Cell::Number(v) => serial_to_datetime(*v),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            Cell::Number(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sheet {
    pub name: String,
    pub rows: Vec<Vec<Cell>>,
}

impl Sheet {
    pub fn cell(&self, row: usize, col: usize) -> &Cell {
        static EMPTY: Cell = Cell::Empty;
        self.rows.get(row).and_then(|r| r.get(col)).unwrap_or(&EMPTY)
    }

    /// Indices of rows holding at least one non-empty cell.
    pub fn non_empty_rows(&self) -> impl Iterator<Item = (usize, &[Cell])> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, r)| r.iter().any(|c| !c.is_empty()))
            .map(|(i, r)| (i, r.as_slice()))
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Workbook {
    pub sheets: Vec<Sheet>,
}

impl Workbook {
    /// Open an ODS or XLSX archive held in memory.
    pub fn from_bytes(bytes: &[u8]) -> Result<Workbook> {
        let mut zip = ZipArchive::new(Cursor::new(bytes)).map_err(zip_error)?;
        if let Some(content) = read_part(&mut zip, "content.xml")? {
            let sheets = parse_ods(&content)?;
            log::debug!("ODS workbook with {} sheets", sheets.len());
            return Ok(Workbook { sheets });
        }
        if zip.by_name("xl/workbook.xml").is_ok() {
            let sheets = parse_xlsx(&mut zip)?;
            log::debug!("XLSX workbook with {} sheets", sheets.len());
            return Ok(Workbook { sheets });
        }
        Err(Error::format("Archive is neither an ODS nor an XLSX workbook."))
    }

    /// Sheet by name, case-insensitively.
    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name.eq_ignore_ascii_case(name))
    }
}

/// Spreadsheet serial day number (1900 date system) to a timestamp.
pub fn serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let millis = (serial * 86_400_000.0).round() as i64;
    epoch.checked_add_signed(Duration::milliseconds(millis))
}

fn zip_error(err: ZipError) -> Error {
    Error::format(format!("Invalid workbook archive: {err}"))
}

fn xml_error(err: impl std::fmt::Display) -> Error {
    Error::format(format!("Malformed workbook XML: {err}"))
}

fn read_part<R: Read + Seek>(zip: &mut ZipArchive<R>, name: &str) -> Result<Option<String>> {
    let mut file = match zip.by_name(name) {
        Ok(f) => f,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(zip_error(e)),
    };
    let mut text = String::new();
    file.read_to_string(&mut text)
        .map_err(|e| Error::format(format!("Failed to read '{name}' from workbook: {e}")))?;
    Ok(Some(text))
}

fn attr(e: &BytesStart, key: &[u8]) -> Result<Option<String>> {
    for a in e.attributes() {
        let a = a.map_err(xml_error)?;
        if a.key.as_ref() == key {
            return Ok(Some(a.unescape_value().map_err(xml_error)?.into_owned()));
        }
    }
    Ok(None)
}

fn count_attr(e: &BytesStart, key: &[u8]) -> Result<usize> {
    match attr(e, key)? {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| Error::format(format!("Invalid repeat count '{v}'."))),
        None => Ok(1),
    }
}

// ---------------------------------------------------------------------------
// ODS
// ---------------------------------------------------------------------------

struct OdsCell {
    number: Option<f64>,
    text: String,
    paragraphs: usize,
    repeat: usize,
}

/// Trailing empty rows and cells are deferred and dropped at the end of their parent,
/// so the huge repeat counts spreadsheet tools write for padding never materialise.
#[derive(Default)]
struct OdsBuilder {
    sheets: Vec<Sheet>,
    sheet: Option<Sheet>,
    pending_rows: usize,
    row: Vec<Cell>,
    row_repeat: usize,
    pending_cells: usize,
    cell: Option<OdsCell>,
    in_paragraph: bool,
}

impl OdsBuilder {
    fn start(&mut self, e: &BytesStart) -> Result<()> {
        match e.name().as_ref() {
            b"table:table" => {
                self.sheet = Some(Sheet {
                    name: attr(e, b"table:name")?.unwrap_or_default(),
                    rows: Vec::new(),
                });
                self.pending_rows = 0;
            }
            b"table:table-row" => {
                self.row.clear();
                self.pending_cells = 0;
                self.row_repeat = count_attr(e, b"table:number-rows-repeated")?;
            }
            b"table:table-cell" | b"table:covered-table-cell" => {
                let number = match attr(e, b"office:value-type")?.as_deref() {
                    Some("float" | "percentage" | "currency") => {
                        attr(e, b"office:value")?.and_then(|v| v.trim().parse().ok())
                    }
                    _ => None,
                };
                self.cell = Some(OdsCell {
                    number,
                    text: String::new(),
                    paragraphs: 0,
                    repeat: count_attr(e, b"table:number-columns-repeated")?,
                });
            }
            b"text:p" => {
                if let Some(c) = self.cell.as_mut() {
                    if c.paragraphs > 0 {
                        c.text.push('\n');
                    }
                    c.paragraphs += 1;
                    self.in_paragraph = true;
                }
            }
            b"text:s" => {
                if let Some(c) = self.cell.as_mut() {
                    let n = count_attr(e, b"text:c")?;
                    c.text.extend(std::iter::repeat_n(' ', n));
                }
            }
            b"text:tab" => {
                if let Some(c) = self.cell.as_mut() {
                    c.text.push('\t');
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn text(&mut self, text: &str) {
        if self.in_paragraph {
            if let Some(c) = self.cell.as_mut() {
                c.text.push_str(text);
            }
        }
    }

    fn end(&mut self, name: &[u8]) {
        match name {
            b"text:p" => self.in_paragraph = false,
            b"table:table-cell" | b"table:covered-table-cell" => {
                let Some(c) = self.cell.take() else { return };
                let value = match c.number {
                    Some(v) => Cell::Number(v),
                    None if c.text.trim().is_empty() => Cell::Empty,
                    None => Cell::Text(c.text),
                };
                if value.is_empty() {
                    self.pending_cells += c.repeat;
                } else {
                    self.row
                        .extend(std::iter::repeat_n(Cell::Empty, self.pending_cells));
                    self.pending_cells = 0;
                    self.row.extend(std::iter::repeat_n(value, c.repeat));
                }
            }
            b"table:table-row" => {
                let Some(sheet) = self.sheet.as_mut() else { return };
                if self.row.is_empty() {
                    self.pending_rows += self.row_repeat;
                } else {
                    sheet
                        .rows
                        .extend(std::iter::repeat_n(Vec::new(), self.pending_rows));
                    self.pending_rows = 0;
                    let row = std::mem::take(&mut self.row);
                    sheet.rows.extend(std::iter::repeat_n(row, self.row_repeat));
                }
            }
            b"table:table" => {
                if let Some(sheet) = self.sheet.take() {
                    self.sheets.push(sheet);
                }
            }
            _ => {}
        }
    }
}

fn parse_ods(content: &str) -> Result<Vec<Sheet>> {
    let mut reader = Reader::from_str(content);
    let mut b = OdsBuilder::default();
    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(e) => b.start(&e)?,
            Event::Empty(e) => {
                b.start(&e)?;
                b.end(e.name().as_ref());
            }
            Event::End(e) => b.end(e.name().as_ref()),
            Event::Text(t) => b.text(&t.unescape().map_err(xml_error)?),
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(b.sheets)
}

// ---------------------------------------------------------------------------
// XLSX
// ---------------------------------------------------------------------------

/// `"AB12"` -> `(11, 27)` as zero-based (row, column).
fn cell_ref(r: &str) -> Option<(usize, usize)> {
    let split = r.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = r.split_at(split);
    if letters.is_empty() {
        return None;
    }
    let col = letters.bytes().try_fold(0usize, |acc, b| {
        b.is_ascii_alphabetic()
            .then(|| acc * 26 + usize::from(b.to_ascii_uppercase() - b'A' + 1))
    })?;
    let row: usize = digits.parse().ok()?;
    Some((row.checked_sub(1)?, col - 1))
}

fn parse_shared_strings(xml: &str) -> Result<Vec<String>> {
    let mut reader = Reader::from_str(xml);
    let mut out = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    let mut in_phonetic = false;
    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(e) => match e.name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = true,
                b"rPh" => in_phonetic = true,
                _ => {}
            },
            Event::Empty(e) if e.name().as_ref() == b"si" => out.push(String::new()),
            Event::End(e) => match e.name().as_ref() {
                b"si" => out.push(current.take().unwrap_or_default()),
                b"t" => in_t = false,
                b"rPh" => in_phonetic = false,
                _ => {}
            },
            Event::Text(t) if in_t && !in_phonetic => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&t.unescape().map_err(xml_error)?);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(out)
}

/// `(name, part path)` in workbook order.
fn sheet_parts<R: Read + Seek>(zip: &mut ZipArchive<R>) -> Result<Vec<(String, String)>> {
    let rels_xml = read_part(zip, "xl/_rels/workbook.xml.rels")?.unwrap_or_default();
    let mut targets: HashMap<String, String> = HashMap::new();
    let mut reader = Reader::from_str(&rels_xml);
    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(e) | Event::Empty(e) if e.name().as_ref() == b"Relationship" => {
                if let (Some(id), Some(target)) = (attr(&e, b"Id")?, attr(&e, b"Target")?) {
                    let path = match target.strip_prefix('/') {
                        Some(abs) => abs.to_string(),
                        None => format!("xl/{target}"),
                    };
                    targets.insert(id, path);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let workbook_xml = read_part(zip, "xl/workbook.xml")?.unwrap_or_default();
    let mut reader = Reader::from_str(&workbook_xml);
    let mut parts = Vec::new();
    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(e) | Event::Empty(e) if e.name().as_ref() == b"sheet" => {
                let name = attr(&e, b"name")?.unwrap_or_default();
                let path = match attr(&e, b"r:id")? {
                    Some(id) => targets.get(&id).cloned(),
                    None => None,
                }
                .unwrap_or_else(|| format!("xl/worksheets/sheet{}.xml", parts.len() + 1));
                parts.push((name, path));
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(parts)
}

#[derive(Default)]
struct XlsxCell {
    kind: String,
    col: Option<usize>,
    value: Option<String>,
    inline: String,
}

fn parse_worksheet(name: String, xml: &str, shared: &[String]) -> Result<Sheet> {
    let mut reader = Reader::from_str(xml);
    let mut sheet = Sheet {
        name,
        rows: Vec::new(),
    };
    let mut row: Vec<Cell> = Vec::new();
    let mut row_index = 0usize;
    let mut cell: Option<XlsxCell> = None;
    let mut in_v = false;
    let mut in_t = false;

    let finish_cell = |c: XlsxCell, row: &mut Vec<Cell>| {
        let value = match c.kind.as_str() {
            "s" => c
                .value
                .as_deref()
                .and_then(|v| v.trim().parse::<usize>().ok())
                .and_then(|i| shared.get(i))
                .map_or(Cell::Empty, |s| Cell::Text(s.clone())),
            "inlineStr" => Cell::Text(c.inline),
            "str" | "e" => c.value.map_or(Cell::Empty, Cell::Text),
            "b" => Cell::Text(if c.value.as_deref() == Some("1") { "TRUE" } else { "FALSE" }.into()),
            _ => match c.value.as_deref().map(str::trim) {
                Some(v) => v.parse().map_or_else(|_| Cell::Text(v.to_string()), Cell::Number),
                None => Cell::Empty,
            },
        };
        let col = c.col.unwrap_or(row.len());
        if row.len() <= col {
            row.resize(col + 1, Cell::Empty);
        }
        row[col] = value;
    };
    let finish_row = |row: &mut Vec<Cell>, index: usize, sheet: &mut Sheet| {
        while row.last().is_some_and(Cell::is_empty) {
            row.pop();
        }
        if row.is_empty() {
            return;
        }
        if sheet.rows.len() <= index {
            sheet.rows.resize(index + 1, Vec::new());
        }
        sheet.rows[index] = std::mem::take(row);
    };

    loop {
        let event = reader.read_event().map_err(xml_error)?;
        let (start, empty) = match &event {
            Event::Start(e) => (Some(e.clone()), false),
            Event::Empty(e) => (Some(e.clone()), true),
            _ => (None, false),
        };
        if let Some(e) = start {
            match e.name().as_ref() {
                b"row" => {
                    row.clear();
                    row_index = match attr(&e, b"r")? {
                        Some(r) => r.trim().parse::<usize>().ok().and_then(|r| r.checked_sub(1)),
                        None => None,
                    }
                    .unwrap_or(sheet.rows.len());
                    if empty {
                        finish_row(&mut row, row_index, &mut sheet);
                    }
                }
                b"c" => {
                    let c = XlsxCell {
                        kind: attr(&e, b"t")?.unwrap_or_default(),
                        col: attr(&e, b"r")?.as_deref().and_then(cell_ref).map(|(_, c)| c),
                        ..XlsxCell::default()
                    };
                    if empty {
                        finish_cell(c, &mut row);
                    } else {
                        cell = Some(c);
                    }
                }
                b"v" if !empty => in_v = true,
                b"t" if !empty => in_t = true,
                _ => {}
            }
            continue;
        }
        match event {
            Event::End(e) => match e.name().as_ref() {
                b"v" => in_v = false,
                b"t" => in_t = false,
                b"c" => {
                    if let Some(c) = cell.take() {
                        finish_cell(c, &mut row);
                    }
                }
                b"row" => finish_row(&mut row, row_index, &mut sheet),
                _ => {}
            },
            Event::Text(t) => {
                if let Some(c) = cell.as_mut() {
                    let text = t.unescape().map_err(xml_error)?;
                    if in_v {
                        c.value.get_or_insert_with(String::new).push_str(&text);
                    } else if in_t {
                        c.inline.push_str(&text);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(sheet)
}

fn parse_xlsx<R: Read + Seek>(zip: &mut ZipArchive<R>) -> Result<Vec<Sheet>> {
    let shared = match read_part(zip, "xl/sharedStrings.xml")? {
        Some(xml) => parse_shared_strings(&xml)?,
        None => Vec::new(),
    };
    let mut sheets = Vec::new();
    for (name, path) in sheet_parts(zip)? {
        let xml = read_part(zip, &path)?
            .ok_or_else(|| Error::format(format!("Workbook sheet part '{path}' is missing.")))?;
        sheets.push(parse_worksheet(name, &xml, &shared)?);
    }
    Ok(sheets)
}

/// In-memory zip archive for reader tests.
#[cfg(test)]
pub(crate) fn build_zip(parts: &[(&str, &str)]) -> Vec<u8> {
    use std::io::Write;
    let mut w = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let opts = zip::write::SimpleFileOptions::default();
    for (name, body) in parts {
        w.start_file(*name, opts).unwrap();
        w.write_all(body.as_bytes()).unwrap();
    }
    w.finish().unwrap().into_inner()
}

/// ODS `content.xml` for reader tests: one `<table:table>` per sheet, numeric-looking
/// cells typed as floats.
#[cfg(test)]
pub(crate) fn ods_content(sheets: &[(&str, Vec<Vec<&str>>)]) -> String {
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
<office:document-content xmlns:office=\"urn:oasis:names:tc:opendocument:xmlns:office:1.0\" \
xmlns:table=\"urn:oasis:names:tc:opendocument:xmlns:table:1.0\" \
xmlns:text=\"urn:oasis:names:tc:opendocument:xmlns:text:1.0\"><office:body><office:spreadsheet>",
    );
    for (name, rows) in sheets {
        xml.push_str(&format!("<table:table table:name=\"{name}\">"));
        for row in rows {
            xml.push_str("<table:table-row>");
            for cell in row {
                if cell.is_empty() {
                    xml.push_str("<table:table-cell/>");
                } else if cell.parse::<f64>().is_ok() {
                    xml.push_str(&format!(
                        "<table:table-cell office:value-type=\"float\" office:value=\"{cell}\"><text:p>{cell}</text:p></table:table-cell>"
                    ));
                } else {
                    xml.push_str(&format!(
                        "<table:table-cell office:value-type=\"string\"><text:p>{cell}</text:p></table:table-cell>"
                    ));
                }
            }
            xml.push_str("</table:table-row>");
        }
        xml.push_str("</table:table>");
    }
    xml.push_str("</office:spreadsheet></office:body></office:document-content>");
    xml
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ods_repeats_and_trailing_padding() {
        let content = "<office:document-content><office:body><office:spreadsheet>\
<table:table table:name=\"Data\">\
<table:table-row><table:table-cell office:value-type=\"string\"><text:p>Time <text:span>[h]</text:span></text:p></table:table-cell>\
<table:table-cell office:value-type=\"float\" office:value=\"2\" table:number-columns-repeated=\"2\"><text:p>2</text:p></table:table-cell>\
<table:table-cell table:number-columns-repeated=\"1000\"/></table:table-row>\
<table:table-row table:number-rows-repeated=\"2\"><table:table-cell/></table:table-row>\
<table:table-row><table:table-cell/><table:table-cell office:value-type=\"float\" office:value=\"1.5\"/></table:table-row>\
<table:table-row table:number-rows-repeated=\"1048570\"><table:table-cell table:number-columns-repeated=\"1024\"/></table:table-row>\
</table:table></office:spreadsheet></office:body></office:document-content>";
        let bytes = build_zip(&[("mimetype", "application/vnd.oasis.opendocument.spreadsheet"), ("content.xml", content)]);
        let wb = Workbook::from_bytes(&bytes).unwrap();
        let sheet = wb.sheet("data").unwrap();
        assert_eq!(sheet.rows.len(), 4);
        assert_eq!(sheet.rows[0], vec![Cell::Text("Time [h]".into()), Cell::Number(2.0), Cell::Number(2.0)]);
        assert!(sheet.rows[1].is_empty());
        assert_eq!(sheet.cell(3, 1), &Cell::Number(1.5));
        assert_eq!(sheet.cell(3, 0), &Cell::Empty);
    }

    #[test]
    fn xlsx_shared_strings_and_references() {
        let workbook = "<workbook xmlns:r=\"r\"><sheets><sheet name=\"Plate\" sheetId=\"1\" r:id=\"rId1\"/></sheets></workbook>";
        let rels = "<Relationships><Relationship Id=\"rId1\" Target=\"worksheets/sheet1.xml\"/></Relationships>";
        let strings = "<sst><si><t>Well</t></si><si><r><t>Con</t></r><r><t>tent</t></r></si></sst>";
        let sheet = "<worksheet><sheetData>\
<row r=\"1\"><c r=\"A1\" t=\"s\"><v>0</v></c><c r=\"C1\" t=\"s\"><v>1</v></c></row>\
<row r=\"3\"><c r=\"B3\"><v>0.25</v></c><c r=\"D3\" t=\"inlineStr\"><is><t>x &amp; y</t></is></c></row>\
</sheetData></worksheet>";
        let bytes = build_zip(&[
            ("xl/workbook.xml", workbook),
            ("xl/_rels/workbook.xml.rels", rels),
            ("xl/sharedStrings.xml", strings),
            ("xl/worksheets/sheet1.xml", sheet),
        ]);
        let wb = Workbook::from_bytes(&bytes).unwrap();
        let s = &wb.sheets[0];
        assert_eq!(s.name, "Plate");
        assert_eq!(s.cell(0, 0).as_text(), "Well");
        assert_eq!(s.cell(0, 1), &Cell::Empty);
        assert_eq!(s.cell(0, 2).as_text(), "Content");
        assert!(s.rows[1].is_empty());
        assert_eq!(s.cell(2, 1).as_number(), Some(0.25));
        assert_eq!(s.cell(2, 3).as_text(), "x & y");
    }

    #[test]
    fn cell_references() {
        assert_eq!(cell_ref("A1"), Some((0, 0)));
        assert_eq!(cell_ref("AB12"), Some((11, 27)));
        assert_eq!(cell_ref("12"), None);
    }

    #[test]
    fn serial_dates() {
        let dt = serial_to_datetime(45356.5).unwrap();
        assert_eq!(dt.to_string(), "2024-03-05 12:00:00");
    }

    #[test]
    fn rejects_plain_zip() {
        let bytes = build_zip(&[("readme.txt", "hi")]);
        assert!(Workbook::from_bytes(&bytes).is_err());
    }
}
