//! Spreadsheet generation. No `.xlsx`-writing crate appears anywhere in the
//! reference pack, so a workbook here is a CSV file per worksheet under a
//! per-workbook staging directory — a documented scope reduction, not a
//! faithful Excel format (see DESIGN.md). The handle/kind contract
//! (`workbook_id`, `worksheet_id`) is unaffected by that choice.

use crate::params::required_str;
use async_trait::async_trait;
use bridge_config::ResourceKind;
use bridge_core::{registry::PutOptions, BridgeError, HandlerContext, ModuleCatalog, ModuleHandler};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Mutex as StdMutex;

pub fn register(catalog: &mut ModuleCatalog) {
    catalog.register("excel", "create_workbook", CreateWorkbook);
    catalog.register("excel", "add_worksheet", AddWorksheet);
    catalog.register("excel", "write_cell", WriteCell);
    catalog.register("excel", "save_workbook", SaveWorkbook);
    catalog.register("excel", "close_workbook", CloseWorkbook);
}

/// `row -> col -> value`, one grid per worksheet, held in memory until
/// `save_workbook` flushes each grid to a CSV file.
struct Worksheet {
    name: String,
    cells: BTreeMap<u64, BTreeMap<u64, String>>,
}

struct Workbook {
    filename: String,
    worksheets: Vec<Worksheet>,
}

struct CreateWorkbook;

#[async_trait]
impl ModuleHandler for CreateWorkbook {
    fn required_params(&self) -> &[&'static str] {
        &["filename"]
    }

    async fn handle(&self, params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let filename = required_str(&params, "excel", "create_workbook", "filename")?;
        let workbook = Workbook {
            filename: filename.to_string(),
            worksheets: vec![Worksheet { name: "Sheet1".to_string(), cells: BTreeMap::new() }],
        };
        let handle = ctx
            .registry
            .put(ResourceKind::Workbook, StdMutex::new(workbook), PutOptions::default())
            .await;
        Ok(json!({ "workbook_id": handle }))
    }
}

struct AddWorksheet;

#[async_trait]
impl ModuleHandler for AddWorksheet {
    fn required_params(&self) -> &[&'static str] {
        &["workbook_id", "name"]
    }

    async fn handle(&self, params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let workbook_id = required_str(&params, "excel", "add_worksheet", "workbook_id")?;
        let name = required_str(&params, "excel", "add_worksheet", "name")?;
        let value = ctx.registry.get(ResourceKind::Workbook, workbook_id).await?;
        let workbook = value
            .downcast::<StdMutex<Workbook>>()
            .map_err(|_| BridgeError::Internal("workbook handle type mismatch".to_string()))?;
        let index = {
            let mut wb = workbook.lock().unwrap();
            wb.worksheets.push(Worksheet { name: name.to_string(), cells: BTreeMap::new() });
            wb.worksheets.len() - 1
        };
        let handle = ctx
            .registry
            .put(ResourceKind::Worksheet, (workbook_id.to_string(), index), PutOptions::default())
            .await;
        Ok(json!({ "worksheet_id": handle }))
    }
}

struct WriteCell;

#[async_trait]
impl ModuleHandler for WriteCell {
    fn required_params(&self) -> &[&'static str] {
        &["workbook_id", "row", "col", "value"]
    }

    async fn handle(&self, params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let workbook_id = required_str(&params, "excel", "write_cell", "workbook_id")?;
        let row = params.get("row").and_then(Value::as_u64).ok_or_else(missing_row_col)?;
        let col = params.get("col").and_then(Value::as_u64).ok_or_else(missing_row_col)?;
        let cell_value = params
            .get("value")
            .map(value_to_cell_string)
            .unwrap_or_default();

        let sheet_index = match params.get("worksheet_id").and_then(Value::as_str) {
            Some(worksheet_id) => {
                let ws_value = ctx.registry.get(ResourceKind::Worksheet, worksheet_id).await?;
                let (_, idx) = *ws_value
                    .downcast::<(String, usize)>()
                    .map_err(|_| BridgeError::Internal("worksheet handle type mismatch".to_string()))?;
                idx
            }
            None => 0,
        };

        let value = ctx.registry.get(ResourceKind::Workbook, workbook_id).await?;
        let workbook = value
            .downcast::<StdMutex<Workbook>>()
            .map_err(|_| BridgeError::Internal("workbook handle type mismatch".to_string()))?;
        let mut wb = workbook.lock().unwrap();
        let sheet = wb
            .worksheets
            .get_mut(sheet_index)
            .ok_or_else(|| BridgeError::InvalidHandle(format!("{workbook_id}#{sheet_index}")))?;
        sheet.cells.entry(row).or_default().insert(col, cell_value);
        Ok(json!({ "written": true }))
    }
}

fn missing_row_col() -> BridgeError {
    BridgeError::InvalidParams("excel".to_string(), "write_cell".to_string(), "row and col must be non-negative integers".to_string())
}

fn value_to_cell_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

struct SaveWorkbook;

#[async_trait]
impl ModuleHandler for SaveWorkbook {
    fn required_params(&self) -> &[&'static str] {
        &["workbook_id"]
    }

    async fn handle(&self, params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let workbook_id = required_str(&params, "excel", "save_workbook", "workbook_id")?;
        let value = ctx.registry.get(ResourceKind::Workbook, workbook_id).await?;
        let workbook = value
            .downcast::<StdMutex<Workbook>>()
            .map_err(|_| BridgeError::Internal("workbook handle type mismatch".to_string()))?;
        let wb = workbook.lock().unwrap();

        let base = std::path::Path::new(&wb.filename);
        let mut written = Vec::new();
        for sheet in &wb.worksheets {
            let path = sibling_csv_path(base, &sheet.name);
            let mut writer = csv::Writer::from_path(&path)
                .map_err(|e| BridgeError::Handler(format!("failed to create {}: {e}", path.display())))?;
            let max_row = sheet.cells.keys().max().copied().unwrap_or(0);
            let max_col = sheet
                .cells
                .values()
                .flat_map(|row| row.keys())
                .max()
                .copied()
                .unwrap_or(0);
            for row_idx in 0..=max_row {
                let row = sheet.cells.get(&row_idx);
                let record: Vec<String> = (0..=max_col)
                    .map(|col_idx| {
                        row.and_then(|r| r.get(&col_idx)).cloned().unwrap_or_default()
                    })
                    .collect();
                writer
                    .write_record(&record)
                    .map_err(|e| BridgeError::Handler(format!("failed to write row: {e}")))?;
            }
            writer.flush().map_err(|e| BridgeError::Handler(format!("failed to flush {}: {e}", path.display())))?;
            written.push(path.display().to_string());
        }
        Ok(json!({ "saved": true, "files": written }))
    }
}

fn sibling_csv_path(base: &std::path::Path, sheet_name: &str) -> std::path::PathBuf {
    let stem = base.file_stem().and_then(|s| s.to_str()).unwrap_or("workbook");
    base.with_file_name(format!("{stem}.{sheet_name}.csv"))
}

struct CloseWorkbook;

#[async_trait]
impl ModuleHandler for CloseWorkbook {
    fn required_params(&self) -> &[&'static str] {
        &["workbook_id"]
    }

    async fn handle(&self, params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let workbook_id = required_str(&params, "excel", "close_workbook", "workbook_id")?;
        ctx.registry.delete(ResourceKind::Workbook, workbook_id).await?;
        Ok(json!({ "closed": true }))
    }
}
