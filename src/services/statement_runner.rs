use crate::error::{AbortedError, BridgeError, DriverError, ExecutionError, Result};
use crate::models::{
    AfterSqlReport, ColumnDescriptor, ConnectionDescriptor, FetchMode, NativeCell, QueryOutcome,
    QueryRequest, RowRecord, StatementResult,
};
use crate::services::converter::{converter_for, CellConverter, ConversionContext};
use crate::services::database::{self, Connection, ExecuteError, ExecuteRequest, ResultSink, SinkControl};
use crate::services::parameters;
use crate::services::render::Renderer;
use crate::storage::Staging;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Executes SQL invocations against one connection at a time.
///
/// STORE spool files that never reach staging are left on disk and listed in
/// the returned error; removing them is up to the caller.
pub struct StatementRunner {
    staging: Arc<dyn Staging>,
    temp_dir: PathBuf,
}

impl StatementRunner {
    /// STORE results are spooled under `temp_dir` before being staged
    pub fn new(staging: Arc<dyn Staging>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging,
            temp_dir: temp_dir.into(),
        }
    }

    /// Opens a connection for `descriptor`, runs the rendered request and
    /// closes the connection whatever the outcome
    pub async fn run(
        &self,
        descriptor: &ConnectionDescriptor,
        renderer: &dyn Renderer,
        request: &QueryRequest,
    ) -> Result<QueryOutcome> {
        let mut rendered = request.clone();
        rendered.sql = renderer.render(&request.sql)?;
        rendered.after_sql = request
            .after_sql
            .as_deref()
            .map(|sql| renderer.render(sql))
            .transpose()?;

        let mut connection = database::connect(descriptor, renderer).await?;
        let outcome = self.execute(connection.as_mut(), &rendered).await;
        if let Err(e) = connection.close().await {
            tracing::warn!("Failed to close connection: {}", e);
        }
        outcome
    }

    pub async fn execute(
        &self,
        connection: &mut dyn Connection,
        request: &QueryRequest,
    ) -> Result<QueryOutcome> {
        let start_time = Instant::now();
        let engine = connection.engine();
        let policy = engine.policy();

        // nothing may run when a placeholder has no value
        parameters::check_resolved(&request.sql, &request.parameters, engine)?;
        if let Some(after_sql) = &request.after_sql {
            parameters::check_resolved(after_sql, &request.parameters, engine)?;
        }
        if !policy.multi_statement && parameters::split_statements(&request.sql, engine).len() > 1 {
            return Err(ExecutionError::new(
                0,
                DriverError::unsupported(engine.as_str(), "multiple statements per request"),
            )
            .into());
        }

        let ctx = ConversionContext {
            zone: request.time_zone,
        };

        tracing::info!(
            "Executing SQL on {} (fetch mode {}, transactional {})",
            engine,
            request.fetch_mode.as_str(),
            request.transactional
        );

        let previous_auto_commit = match request.auto_commit {
            Some(enabled) if policy.auto_commit_toggle => {
                let previous = connection
                    .auto_commit()
                    .await
                    .map_err(|e| ExecutionError::new(0, e))?;
                connection
                    .set_auto_commit(enabled)
                    .await
                    .map_err(|e| ExecutionError::new(0, e))?;
                previous
            }
            Some(enabled) => {
                tracing::warn!("{} has no autocommit toggle, ignoring autoCommit={}", engine, enabled);
                None
            }
            None => None,
        };

        let in_transaction = request.transactional && policy.transactions;
        if request.transactional && !policy.transactions {
            tracing::warn!("{} does not support transactions, statements run without one", engine);
        }

        let outcome = self
            .execute_statements(connection, request, ctx, in_transaction)
            .await;

        if let (Some(previous), Some(requested)) = (previous_auto_commit, request.auto_commit) {
            if previous != requested {
                if let Err(e) = connection.set_auto_commit(previous).await {
                    tracing::warn!("Failed to restore autocommit on {}: {}", engine, e);
                }
            }
        }

        let outcome = outcome?;
        tracing::info!(
            "Completed {} statement(s) on {} with {} row(s) in {}ms",
            outcome.results.len(),
            engine,
            outcome.total_rows(),
            start_time.elapsed().as_millis()
        );
        Ok(outcome)
    }

    async fn execute_statements(
        &self,
        connection: &mut dyn Connection,
        request: &QueryRequest,
        ctx: ConversionContext,
        in_transaction: bool,
    ) -> Result<QueryOutcome> {
        let engine = connection.engine();
        if in_transaction {
            connection
                .begin()
                .await
                .map_err(|e| ExecutionError::new(0, e))?;
        }

        let execute_request = ExecuteRequest {
            sql: &request.sql,
            parameters: &request.parameters,
            fetch_size: engine.policy().resolve_fetch_size(request.fetch_size),
        };
        let mut sink = OutcomeSink::new(converter_for(engine), ctx, request.fetch_mode, &self.temp_dir);
        let executed = connection.execute(&execute_request, &mut sink).await;
        let statement_index = sink.completed();
        let Settled {
            mut results,
            files,
            error: write_error,
        } = sink.settle().await;

        let failure = match (executed, write_error) {
            // a send refused by a stopped writer reports the writer's own error
            (Err(ExecuteError::Aborted(BridgeError::Staging(_))), Some((index, error))) => {
                Some((index, ExecuteError::Aborted(error)))
            }
            (Err(failure), _) => Some((statement_index, failure)),
            (Ok(()), write_error) => write_error.map(|(index, error)| (index, ExecuteError::Aborted(error))),
        };

        if let Some((statement_index, failure)) = failure {
            tracing::debug!("Statement {} failed on {}: {:?}", statement_index, engine, failure);
            let rolled_back = in_transaction && rollback(connection).await;
            return Err(interrupted(
                failure,
                statement_index,
                !in_transaction && statement_index > 0,
                rolled_back,
                existing(spool_paths(&files)).await,
            ));
        }

        if in_transaction {
            if let Err(e) = connection.commit().await {
                let mut error = ExecutionError::new(statement_index.saturating_sub(1), e);
                error.spool_files = existing(spool_paths(&files)).await;
                return Err(error.into());
            }
        }

        self.stage_all(files, &mut results).await?;

        let mut outcome = QueryOutcome::new(request.fetch_mode);
        outcome.results = results;

        if let Some(after_sql) = &request.after_sql {
            outcome.after_sql = Some(self.run_after_sql(connection, request, after_sql, ctx).await);
        }
        Ok(outcome)
    }

    /// Stages every spool file or none of them
    async fn stage_all(&self, files: Vec<(usize, PathBuf)>, results: &mut [StatementResult]) -> Result<()> {
        let mut staged: Vec<String> = Vec::with_capacity(files.len());
        let mut pending = files.into_iter();
        while let Some((index, path)) = pending.next() {
            match self.staging.stage_file(&path).await {
                Ok(uri) => {
                    results[index].uri = Some(uri.clone());
                    staged.push(uri);
                }
                Err(source) => {
                    tracing::warn!("Staging result {} failed, withdrawing {} staged file(s)", index, staged.len());
                    for uri in &staged {
                        if let Err(e) = self.staging.remove(uri).await {
                            tracing::warn!("Could not withdraw staged file {}: {}", uri, e);
                        }
                    }
                    let unstaged = std::iter::once(path).chain(pending.map(|(_, path)| path)).collect();
                    return Err(AbortedError {
                        statement_index: index,
                        committed_prior: true,
                        rolled_back: false,
                        spool_files: existing(unstaged).await,
                        source: Box::new(source),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    /// Runs the trailing statement in NONE mode; its failure is reported, not raised
    async fn run_after_sql(
        &self,
        connection: &mut dyn Connection,
        request: &QueryRequest,
        after_sql: &str,
        ctx: ConversionContext,
    ) -> AfterSqlReport {
        let engine = connection.engine();
        let execute_request = ExecuteRequest {
            sql: after_sql,
            parameters: &request.parameters,
            fetch_size: engine.policy().resolve_fetch_size(request.fetch_size),
        };
        let mut sink = OutcomeSink::new(converter_for(engine), ctx, FetchMode::None, &self.temp_dir);
        let executed = connection.execute(&execute_request, &mut sink).await;
        let results = sink.settle().await.results;

        match executed {
            Ok(()) => {
                let affected_rows = results
                    .iter()
                    .filter_map(|result| result.affected_rows)
                    .reduce(|a, b| a + b);
                AfterSqlReport {
                    affected_rows,
                    error: None,
                }
            }
            Err(failure) => {
                let message = match failure {
                    ExecuteError::Driver(error) => error.message,
                    ExecuteError::Aborted(error) => error.to_string(),
                };
                tracing::warn!("After-SQL failed on {}: {}", engine, message);
                AfterSqlReport {
                    affected_rows: None,
                    error: Some(message),
                }
            }
        }
    }
}

/// Rolls back the open transaction, reporting whether that worked
async fn rollback(connection: &mut dyn Connection) -> bool {
    match connection.rollback().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Rollback on {} failed: {}", connection.engine(), e);
            false
        }
    }
}

/// Error for a run cut short at `statement_index`
fn interrupted(
    failure: ExecuteError,
    statement_index: usize,
    committed_prior: bool,
    rolled_back: bool,
    spool_files: Vec<PathBuf>,
) -> BridgeError {
    match failure {
        ExecuteError::Driver(error) => {
            let mut error = ExecutionError::new(statement_index, error);
            error.committed_prior = committed_prior;
            error.rolled_back = rolled_back;
            error.spool_files = spool_files;
            error.into()
        }
        ExecuteError::Aborted(source) => AbortedError {
            statement_index,
            committed_prior,
            rolled_back,
            spool_files,
            source: Box::new(source),
        }
        .into(),
    }
}

fn spool_paths(files: &[(usize, PathBuf)]) -> Vec<PathBuf> {
    files.iter().map(|(_, path)| path.clone()).collect()
}

/// Paths among `paths` that are still on disk
async fn existing(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut found = Vec::with_capacity(paths.len());
    for path in paths {
        if fs::try_exists(&path).await.unwrap_or(false) {
            found.push(path);
        }
    }
    found
}

/// Writes JSON lines to `path` until every sender is gone
async fn write_spool(path: PathBuf, mut lines: mpsc::UnboundedReceiver<Vec<u8>>) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).await?;
    }
    let mut writer = BufWriter::new(fs::File::create(&path).await?);
    while let Some(line) = lines.recv().await {
        writer.write_all(&line).await?;
    }
    writer.flush().await
}

/// Rows of a STORE result on their way to a spool file
struct Spool {
    path: PathBuf,
    lines: mpsc::UnboundedSender<Vec<u8>>,
    writer: JoinHandle<std::io::Result<()>>,
}

impl Spool {
    fn open(temp_dir: &Path) -> Self {
        let path = temp_dir.join(format!("sqlbridge-{}.jsonl", Uuid::new_v4()));
        let (lines, received) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_spool(path.clone(), received));
        Self { path, lines, writer }
    }

    /// Ends the row stream; the writer flushes and exits
    fn close(self, index: usize) -> ClosedSpool {
        drop(self.lines);
        ClosedSpool {
            index,
            path: self.path,
            writer: self.writer,
        }
    }
}

/// A spool whose result will receive no more rows
struct ClosedSpool {
    index: usize,
    path: PathBuf,
    writer: JoinHandle<std::io::Result<()>>,
}

struct PendingResult {
    result: StatementResult,
    spool: Option<Spool>,
    duplicates_flagged: bool,
}

/// Results of one `execute` call once every spool writer has finished
struct Settled {
    results: Vec<StatementResult>,
    files: Vec<(usize, PathBuf)>,
    /// First spool write failure and the result it belongs to
    error: Option<(usize, BridgeError)>,
}

/// Turns driver callbacks into statement results
struct OutcomeSink<'a> {
    converter: &'static dyn CellConverter,
    ctx: ConversionContext,
    fetch_mode: FetchMode,
    temp_dir: &'a Path,
    results: Vec<StatementResult>,
    spooled: Vec<ClosedSpool>,
    current: Option<PendingResult>,
}

impl<'a> OutcomeSink<'a> {
    fn new(
        converter: &'static dyn CellConverter,
        ctx: ConversionContext,
        fetch_mode: FetchMode,
        temp_dir: &'a Path,
    ) -> Self {
        Self {
            converter,
            ctx,
            fetch_mode,
            temp_dir,
            results: Vec::new(),
            spooled: Vec::new(),
            current: None,
        }
    }

    /// Statements whose result was fully received
    fn completed(&self) -> usize {
        self.results.len()
    }

    /// Closes every spool and waits for its writer
    async fn settle(mut self) -> Settled {
        // a result cut short by a failure still has a writer running
        if let Some(spool) = self.current.take().and_then(|pending| pending.spool) {
            let index = self.results.len();
            self.spooled.push(spool.close(index));
        }

        let mut files = Vec::with_capacity(self.spooled.len());
        let mut error = None;
        for spool in self.spooled {
            let written = match spool.writer.await {
                Ok(written) => written.map_err(BridgeError::from),
                Err(e) => Err(BridgeError::Staging(format!(
                    "Spool writer for {} failed: {}",
                    spool.path.display(),
                    e
                ))),
            };
            if let Err(e) = written {
                tracing::warn!("Spooling result {} to {} failed: {}", spool.index, spool.path.display(), e);
                error.get_or_insert((spool.index, e));
            }
            files.push((spool.index, spool.path));
        }
        Settled {
            results: self.results,
            files,
            error,
        }
    }

    fn convert_row(&self, pending: &mut PendingResult, cells: Vec<NativeCell>) -> Result<RowRecord> {
        let statement_index = self.results.len();
        let columns: &[ColumnDescriptor] = &pending.result.columns;
        let mut record = RowRecord::with_capacity(columns.len());
        let mut duplicated = false;
        for (column, cell) in columns.iter().zip(cells.iter()) {
            let value = self
                .converter
                .convert(column, cell, &self.ctx)
                .map_err(|source| BridgeError::Conversion {
                    statement_index,
                    source,
                })?;
            duplicated |= record.insert(&column.name, value);
        }
        if duplicated && !pending.duplicates_flagged {
            pending.duplicates_flagged = true;
            tracing::warn!(
                "Statement {} returns duplicate column names, later columns overwrite earlier ones",
                statement_index
            );
        }
        Ok(record)
    }
}

impl ResultSink for OutcomeSink<'_> {
    fn begin_result(&mut self, columns: Vec<ColumnDescriptor>) -> Result<()> {
        let spool = (self.fetch_mode == FetchMode::Store && !columns.is_empty()).then(|| Spool::open(self.temp_dir));
        tracing::debug!("Statement {} returns {} column(s)", self.results.len(), columns.len());
        self.current = Some(PendingResult {
            result: StatementResult {
                columns,
                ..Default::default()
            },
            spool,
            duplicates_flagged: false,
        });
        Ok(())
    }

    fn push_row(&mut self, cells: Vec<NativeCell>) -> Result<SinkControl> {
        let mut pending = self
            .current
            .take()
            .ok_or_else(|| BridgeError::Connection("Driver delivered a row outside a result".to_string()))?;
        pending.result.row_count += 1;

        let control = match self.fetch_mode {
            FetchMode::None => Ok(SinkControl::Continue),
            FetchMode::FetchOne => self.convert_row(&mut pending, cells).map(|record| {
                pending.result.row = Some(record);
                SinkControl::Stop
            }),
            FetchMode::Fetch => self.convert_row(&mut pending, cells).map(|record| {
                pending.result.rows.push(record);
                SinkControl::Continue
            }),
            FetchMode::Store => self.convert_row(&mut pending, cells).and_then(|record| {
                if let Some(spool) = pending.spool.as_ref() {
                    let mut line = serde_json::to_vec(&record)?;
                    line.push(b'\n');
                    spool.lines.send(line).map_err(|_| {
                        BridgeError::Staging(format!("Spool writer for {} stopped", spool.path.display()))
                    })?;
                }
                Ok(SinkControl::Continue)
            }),
        };
        self.current = Some(pending);
        control
    }

    fn end_result(&mut self, affected_rows: Option<u64>) -> Result<()> {
        let Some(mut pending) = self.current.take() else {
            return Err(BridgeError::Connection("Driver ended a result it never began".to_string()));
        };
        pending.result.affected_rows = affected_rows;
        let index = self.results.len();
        if let Some(spool) = pending.spool.take() {
            self.spooled.push(spool.close(index));
        }
        tracing::debug!(
            "Statement {} finished with {} row(s), affected {:?}",
            index,
            pending.result.row_count,
            affected_rows
        );
        self.results.push(pending.result);
        Ok(())
    }
}
