use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use rust_xlsxwriter::{
    Format as CellFormat, FormatAlign, Table, TableColumn, TableStyle, Workbook, Worksheet,
    XlsxError,
};
use serde::Serialize;

use crate::facets::{Output, Parameter, Resource, ViewRecord};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Failed to write {0}: {1}")]
    Io(String, #[source] io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Excel error: {0}")]
    Excel(#[from] XlsxError),

    #[error("if format is excel, must specify output file path arg '-o'")]
    OutputRequired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    Csv,
    Json,
    Excel,
}

/// A workbook cannot go to stdout.
pub fn check_destination(format: Format, path: Option<&Path>) -> Result<(), Error> {
    match (format, path) {
        (Format::Excel, None) => Err(Error::OutputRequired),
        _ => Ok(()),
    }
}

/// Column layout of one facet item in the flattened report.
pub trait FacetRow {
    const HEADERS: &'static [&'static str];

    fn cells(&self) -> Vec<String>;
}

impl FacetRow for Parameter {
    const HEADERS: &'static [&'static str] = &[
        "ParameterName",
        "ParameterType",
        "ParameterDescription",
        "ParameterDefaultValue",
        "ParameterActualValue",
    ];

    fn cells(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.kind.clone(),
            self.description.clone(),
            self.default_value.clone(),
            self.actual_value.clone(),
        ]
    }
}

impl FacetRow for Resource {
    const HEADERS: &'static [&'static str] = &[
        "ResourcePhysicalId",
        "ResourceLogicalId",
        "ResourceType",
        "ResourceDescription",
        "ResourceStatus",
        "ResourceDriftStatus",
    ];

    fn cells(&self) -> Vec<String> {
        vec![
            self.physical_id.clone(),
            self.logical_id.clone(),
            self.kind.clone(),
            self.description.clone(),
            self.status.clone(),
            self.drift_status.clone(),
        ]
    }
}

impl FacetRow for Output {
    const HEADERS: &'static [&'static str] = &[
        "OutputName",
        "OutputValue",
        "OutputDescription",
        "OutputExportName",
    ];

    fn cells(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.value.clone(),
            self.description.clone(),
            self.export_name.clone(),
        ]
    }
}

const LEADING_HEADERS: [&str; 4] = ["AccountId", "AccountName", "Region", "StackName"];

fn headers<F: FacetRow>() -> Vec<&'static str> {
    let mut headers: Vec<&str> = LEADING_HEADERS.to_vec();
    headers.extend_from_slice(F::HEADERS);
    headers.push("Error");
    headers
}

/// One row per facet item. A record without items still gets a row so errors and empty stacks show up.
fn rows<F: FacetRow>(records: &[ViewRecord<F>]) -> Vec<Vec<String>> {
    let mut rows = vec![];
    for record in records {
        let leading = vec![
            record.account_id.clone(),
            record.account_name.clone(),
            record.region.clone(),
            record.stack_name.clone(),
        ];
        let error = record.error.clone().unwrap_or_default();

        if record.facets.is_empty() {
            let mut row = leading.clone();
            row.resize(leading.len() + F::HEADERS.len(), String::new());
            row.push(error.clone());
            rows.push(row);
        }
        for facet in &record.facets {
            let mut row = leading.clone();
            row.extend(facet.cells());
            row.push(error.clone());
            rows.push(row);
        }
    }
    rows
}

pub fn write_csv<F: FacetRow, W: Write>(
    records: &[ViewRecord<F>],
    writer: W,
) -> Result<(), Error> {
    let mut csv_writer = csv::Writer::from_writer(writer);

    csv_writer.write_record(headers::<F>())?;
    for row in rows(records) {
        csv_writer.write_record(&row)?;
    }

    csv_writer
        .flush()
        .map_err(|error| Error::Io(String::from("csv output"), error))?;
    return Ok(());
}

const MAX_COLUMN_WIDTH: usize = 50;

/// Adds one sheet holding a styled table that starts at B2, headers included.
pub fn add_sheet<F: FacetRow>(
    workbook: &mut Workbook,
    name: &str,
    records: &[ViewRecord<F>],
) -> Result<(), Error> {
    let headers = headers::<F>();
    let rows = rows(records);

    let worksheet: &mut Worksheet = workbook.add_worksheet();
    worksheet.set_name(name)?;

    let cell_format = CellFormat::new()
        .set_align(FormatAlign::Left)
        .set_align(FormatAlign::VerticalCenter)
        .set_text_wrap();

    let first_row: u32 = 1;
    let first_col: u16 = 1;
    for (offset, header) in headers.iter().enumerate() {
        let col = first_col + offset as u16;
        worksheet.write_string_with_format(first_row, col, *header, &cell_format)?;
    }
    for (row_offset, row) in rows.iter().enumerate() {
        let row_index = first_row + 1 + row_offset as u32;
        for (offset, cell) in row.iter().enumerate() {
            let col = first_col + offset as u16;
            worksheet.write_string_with_format(row_index, col, cell, &cell_format)?;
        }
    }

    for (offset, header) in headers.iter().enumerate() {
        let longest = rows
            .iter()
            .map(|row| row.get(offset).map_or(0, |cell| cell.chars().count()))
            .max()
            .unwrap_or_default();
        let width = if longest >= MAX_COLUMN_WIDTH {
            MAX_COLUMN_WIDTH
        } else if longest <= header.len() {
            header.len() + 5
        } else {
            longest
        };
        worksheet.set_column_width(first_col + offset as u16, width as f64)?;
    }

    // A table needs at least one data row.
    if !rows.is_empty() {
        let columns: Vec<TableColumn> = headers
            .iter()
            .map(|header| TableColumn::new().set_header(*header))
            .collect();
        let table = Table::new()
            .set_name(name)
            .set_style(TableStyle::Medium2)
            .set_first_column(true)
            .set_last_column(true)
            .set_banded_rows(false)
            .set_banded_columns(true)
            .set_columns(&columns);
        let last_row = first_row + rows.len() as u32;
        let last_col = first_col + headers.len() as u16 - 1;
        worksheet.add_table(first_row, first_col, last_row, last_col, &table)?;
    }

    tracing::debug!(sheet = name, rows = rows.len(), "sheet added");
    return Ok(());
}

/// Replaces the workbook at `path`. An existing file is kept as `<path>.bak` until the new one
/// is written, and put back if writing fails.
pub fn save_workbook(workbook: &mut Workbook, path: &Path) -> Result<(), Error> {
    let buffer = workbook.save_to_buffer()?;

    let mut backup = path.as_os_str().to_owned();
    backup.push(".bak");
    let backup = PathBuf::from(backup);

    let had_previous = path.exists();
    if had_previous {
        fs::rename(path, &backup)
            .map_err(|error| Error::Io(path.display().to_string(), error))?;
    }

    match fs::write(path, &buffer) {
        Ok(()) => {
            if had_previous {
                if let Err(error) = fs::remove_file(&backup) {
                    tracing::warn!(
                        backup = %backup.display(),
                        error = %error,
                        "failed to remove backup"
                    );
                }
            }
            Ok(())
        }
        Err(error) => {
            if had_previous {
                if let Err(restore) = fs::rename(&backup, path) {
                    tracing::error!(
                        backup = %backup.display(),
                        error = %restore,
                        "failed to restore backup"
                    );
                }
            }
            Err(Error::Io(path.display().to_string(), error))
        }
    }
}

fn write_excel<F: FacetRow>(
    records: &[ViewRecord<F>],
    sheet_name: &str,
    path: Option<&Path>,
) -> Result<(), Error> {
    let Some(path) = path else {
        return Err(Error::OutputRequired);
    };

    let mut workbook = Workbook::new();
    add_sheet(&mut workbook, sheet_name, records)?;
    save_workbook(&mut workbook, path)?;

    tracing::debug!(records = records.len(), destination = %path.display(), "report written");
    return Ok(());
}

pub fn write_json<T: Serialize + ?Sized, W: Write>(value: &T, writer: W) -> Result<(), Error> {
    serde_json::to_writer(writer, value)?;
    return Ok(());
}

/// Where a report goes: a file when a path is given, stdout otherwise.
pub fn open(path: Option<&Path>) -> Result<Box<dyn Write>, Error> {
    match path {
        Some(path) => {
            let file = fs::File::create(path)
                .map_err(|error| Error::Io(path.display().to_string(), error))?;
            Ok(Box::new(io::BufWriter::new(file)))
        }
        None => Ok(Box::new(io::stdout().lock())),
    }
}

/// Writes one facet view. Excel output gets a single sheet named after the facet.
pub fn write<F: FacetRow + Serialize>(
    records: &[ViewRecord<F>],
    format: Format,
    sheet_name: &str,
    path: Option<&Path>,
) -> Result<(), Error> {
    match format {
        Format::Csv | Format::Json => write_text(records, format, path),
        Format::Excel => write_excel(records, sheet_name, path),
    }
}

fn write_text<F: FacetRow + Serialize>(
    records: &[ViewRecord<F>],
    format: Format,
    path: Option<&Path>,
) -> Result<(), Error> {
    let mut writer = open(path)?;
    if format == Format::Json {
        write_json(records, &mut writer)?;
    } else {
        write_csv(records, &mut writer)?;
    }
    writer
        .flush()
        .map_err(|error| Error::Io(describe(path), error))?;

    tracing::debug!(records = records.len(), destination = %describe(path), "report written");
    return Ok(());
}

/// The three facet views of one run, written together.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AllViews {
    pub parameters: Vec<ViewRecord<Parameter>>,
    pub resources: Vec<ViewRecord<Resource>>,
    pub outputs: Vec<ViewRecord<Output>>,
}

/// JSON goes to one document and Excel to one workbook with a sheet per facet. CSV needs a
/// directory and gets one file per facet.
pub fn write_all(views: &AllViews, format: Format, path: Option<&Path>) -> Result<(), Error> {
    match format {
        Format::Json => {
            let mut writer = open(path)?;
            write_json(views, &mut writer)?;
            writer
                .flush()
                .map_err(|error| Error::Io(describe(path), error))?;
        }
        Format::Csv => {
            let directory = path.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
            fs::create_dir_all(&directory)
                .map_err(|error| Error::Io(directory.display().to_string(), error))?;

            let parameters = directory.join("parameters.csv");
            let resources = directory.join("resources.csv");
            let outputs = directory.join("outputs.csv");
            write_text(&views.parameters, format, Some(parameters.as_path()))?;
            write_text(&views.resources, format, Some(resources.as_path()))?;
            write_text(&views.outputs, format, Some(outputs.as_path()))?;
        }
        Format::Excel => {
            let Some(path) = path else {
                return Err(Error::OutputRequired);
            };

            let mut workbook = Workbook::new();
            add_sheet(&mut workbook, "parameters", &views.parameters)?;
            add_sheet(&mut workbook, "resources", &views.resources)?;
            add_sheet(&mut workbook, "outputs", &views.outputs)?;
            save_workbook(&mut workbook, path)?;
        }
    }

    return Ok(());
}

fn describe(path: Option<&Path>) -> String {
    match path {
        Some(path) => path.display().to_string(),
        None => String::from("stdout"),
    }
}
