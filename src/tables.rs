use crate::db::DataRow;

/// Rendering descriptor for a data source: column headings in SELECT order,
/// an optional per-row link template, and any columns that exist only to
/// support UI row selection and are dropped from exports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataTable {
    pub name: String,
    pub columns: Vec<String>,
    pub link_template: Option<String>,
    pub export_hidden: Vec<usize>,
}

impl DataTable {
    pub fn new(name: &str, columns: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            link_template: None,
            export_hidden: Vec::new(),
        }
    }

    pub fn with_link_template(mut self, template: &str) -> Self {
        self.link_template = Some(template.to_string());
        self
    }

    pub fn with_export_hidden(mut self, indexes: &[usize]) -> Self {
        self.export_hidden = indexes.to_vec();
        self
    }
}

/// Attachment filename for a CSV export, derived from the class name and the
/// export kind.
pub fn csv_filename(class_name: &str, kind: &str) -> String {
    let safe: String = class_name
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    format!("{}__{}.csv", safe, kind)
}

/// Render rows as a CSV document: a header row of the table's declared
/// columns, then one line per record. Export-hidden columns are dropped from
/// both headers and cells.
pub fn render_csv(table: &DataTable, rows: &[DataRow]) -> Vec<u8> {
    let keep = |index: &usize| !table.export_hidden.contains(index);

    let mut out = String::new();
    let headers: Vec<String> = table
        .columns
        .iter()
        .enumerate()
        .filter(|(i, _)| keep(i))
        .map(|(_, heading)| csv_escape(heading))
        .collect();
    out.push_str(&headers.join(","));
    out.push_str("\r\n");

    for row in rows {
        let cells: Vec<String> = row
            .iter()
            .enumerate()
            .filter(|(i, _)| keep(i))
            .map(|(_, cell)| csv_escape(&cell_text(cell)))
            .collect();
        out.push_str(&cells.join(","));
        out.push_str("\r\n");
    }

    out.into_bytes()
}

fn cell_text(cell: &serde_json::Value) -> String {
    match cell {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn csv_escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
