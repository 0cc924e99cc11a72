use crate::calc::{AveragesModel, TableModel};
use crate::snapshot::CourseHeader;
use std::io::Write;
use std::path::Path;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
const NO_SECTION: &str = "No section";

#[derive(Debug, Clone, Copy)]
pub struct ExportSettings {
    pub csv_bom: bool,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self { csv_bom: true }
    }
}

fn fmt_grade(v: f64) -> String {
    format!("{:.2}", v)
}

fn csv_writer<W: Write>(mut out: W, bom: bool) -> anyhow::Result<csv::Writer<W>> {
    if bom {
        out.write_all(UTF8_BOM)?;
    }
    // The title and blank rows are narrower than the data rows.
    Ok(csv::WriterBuilder::new().flexible(true).from_writer(out))
}

fn title_row(course: &CourseHeader) -> String {
    let section = course
        .section
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(NO_SECTION);
    format!("Grade record - {} ({})", course.name, section)
}

/// Title row, blank row, header, then one row per student. Returns the number
/// of student rows written.
pub fn write_averages_csv<W: Write>(
    out: W,
    course: &CourseHeader,
    model: &AveragesModel,
    settings: &ExportSettings,
) -> anyhow::Result<usize> {
    let mut w = csv_writer(out, settings.csv_bom)?;
    w.write_record([title_row(course)])?;
    w.write_record([""])?;

    let mut header = vec!["Student".to_string(), "Email".to_string()];
    for c in &model.categories {
        header.push(format!("{} ({}%)", c.name, c.weight));
    }
    header.push("Final average".to_string());
    w.write_record(&header)?;

    for s in &model.students {
        let mut record = vec![s.name.clone(), s.email.clone()];
        for c in &model.categories {
            record.push(fmt_grade(s.per_category.get(&c.id).copied().unwrap_or(0.0)));
        }
        record.push(fmt_grade(s.final_average));
        w.write_record(&record)?;
    }
    w.flush()?;
    Ok(model.students.len())
}

/// Full per-assignment table: each category's assignment grades followed by the
/// category average, then the final average and the omitted assignment titles.
pub fn write_table_csv<W: Write>(
    out: W,
    course: &CourseHeader,
    table: &TableModel,
    settings: &ExportSettings,
) -> anyhow::Result<usize> {
    let mut w = csv_writer(out, settings.csv_bom)?;
    w.write_record([title_row(course)])?;
    w.write_record([""])?;

    let mut header = vec!["Student".to_string(), "Email".to_string()];
    for c in &table.categories {
        for a in &c.assignments {
            header.push(a.title.clone());
        }
        header.push(format!("{} average", c.name));
    }
    header.push("Final average".to_string());
    header.push("Omitted".to_string());
    w.write_record(&header)?;

    for s in &table.students {
        let mut record = vec![s.name.clone(), s.email.clone()];
        let mut omitted: Vec<&str> = Vec::new();
        for c in &table.categories {
            for a in &c.assignments {
                record.push(fmt_grade(s.per_assignment.get(&a.id).copied().unwrap_or(0.0)));
                if s.omitted_assignment_id.as_deref() == Some(a.id.as_str())
                    || s.dropped_assignment_ids.iter().any(|d| *d == a.id)
                {
                    omitted.push(a.title.as_str());
                }
            }
            record.push(fmt_grade(s.per_category.get(&c.id).copied().unwrap_or(0.0)));
        }
        record.push(fmt_grade(s.final_average));
        record.push(omitted.join("; "));
        w.write_record(&record)?;
    }
    w.flush()?;
    Ok(table.students.len())
}

pub fn export_to_path<F>(path: &Path, write: F) -> anyhow::Result<usize>
where
    F: FnOnce(std::io::BufWriter<std::fs::File>) -> anyhow::Result<usize>,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    write(std::io::BufWriter::new(file))
}
