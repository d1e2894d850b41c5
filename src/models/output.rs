// Output assembly: the shapes handed back to the workflow
use crate::models::request::FetchMode;
use crate::models::result::{QueryOutcome, RowRecord, StatementResult};
use serde::Serialize;

/// Output of one statement
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Output {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row: Option<RowRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<RowRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affected_rows: Option<u64>,
}

impl Output {
    pub fn from_result(result: &StatementResult, fetch_mode: FetchMode) -> Self {
        let mut output = Output {
            affected_rows: result.affected_rows,
            ..Default::default()
        };
        if !result.has_result_set() {
            return output;
        }
        match fetch_mode {
            FetchMode::FetchOne => output.row = result.row.clone(),
            FetchMode::Fetch => output.rows = Some(result.rows.clone()),
            FetchMode::Store => {
                output.uri = result.uri.clone();
                output.size = Some(result.row_count);
            }
            FetchMode::None => {}
        }
        output
    }
}

/// One Output per statement, in source order
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct MultiQueryOutput(pub Vec<Output>);

impl MultiQueryOutput {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Output> {
        self.0.iter()
    }
}

impl QueryOutcome {
    /// Flat output for single-statement callers; reflects the last result
    pub fn single_output(&self) -> Output {
        self.last()
            .map(|result| Output::from_result(result, self.fetch_mode))
            .unwrap_or_default()
    }

    pub fn multi_output(&self) -> MultiQueryOutput {
        MultiQueryOutput(
            self.results
                .iter()
                .map(|result| Output::from_result(result, self.fetch_mode))
                .collect(),
        )
    }
}
