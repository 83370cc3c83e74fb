//! Statement engine.
//!
//! A [`Statement`] owns the SQL text (named placeholders already
//! rewritten to positional), the server-side name, and the parse state.
//! Unprepared statements execute through the simple-query path with
//! arguments interpolated client-side; prepared statements go through
//! parse/describe then bind/execute.
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{
    Error, Result,
    connection::Connection,
    context::QueryContext,
    protocol::{Oid, backend::RowDescription, frontend},
    rows::{MultiResult, RowSet},
    sql,
    trace::{span, verbose},
    value::Param,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    Unparsed,
    ParseFailed,
    Parsed,
}

/// A statement scoped to one connection.
#[derive(Debug)]
pub struct Statement {
    command: String,
    prepared_name: String,
    parse_state: ParseState,
    param_oids: Vec<Oid>,
    last_row_desc: Option<RowDescription>,
    num_params: usize,
    named_params: Vec<String>,
}

impl Statement {
    /// Build a statement from SQL text.
    ///
    /// Named `@ident` placeholders are rewritten to positional `?` here;
    /// empty input fails before any network I/O.
    pub fn new(sql_text: &str) -> Result<Statement> {
        if sql_text.trim().is_empty() {
            return Err(Error::empty_statement());
        }

        let mut named_params = Vec::new();
        let command = sql::rewrite_named(sql_text, |name| named_params.push(name.to_string()));
        let num_params = sql::count_positional(&command);

        Ok(Statement {
            command,
            prepared_name: next_statement_name(),
            parse_state: ParseState::Unparsed,
            param_oids: Vec::new(),
            last_row_desc: None,
            num_params,
            named_params,
        })
    }

    /// The number of positional placeholders after the named rewrite.
    pub fn num_input(&self) -> usize {
        self.num_params
    }

    /// The uppercased named placeholders, in encounter order.
    pub fn named_params(&self) -> &[String] {
        &self.named_params
    }

    /// The rewritten SQL text.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Parse and describe the statement server-side.
    ///
    /// No-op when already parsed. On success the parameter type oids and
    /// the row description are cached for the bind/execute phase.
    pub async fn prepare(&mut self, conn: &mut Connection) -> Result<()> {
        if self.parse_state == ParseState::Parsed {
            return Ok(());
        }
        span!("prepare", name = %self.prepared_name);

        self.parse_state = ParseState::ParseFailed;

        conn.send(frontend::Parse {
            prepare_name: &self.prepared_name,
            sql: &self.command,
            param_oids: &[],
        });
        conn.send(frontend::Describe {
            kind: b'S',
            name: &self.prepared_name,
        });
        conn.send(frontend::Flush);

        loop {
            use crate::protocol::backend::BackendMessage::*;
            let received = conn.recv().await;
            match received.map_err(|err| abort_extended(conn, err))? {
                ParseComplete(_) => self.parse_state = ParseState::Parsed,
                ParameterDescription(pd) => self.param_oids = pd.oids,
                RowDescription(rd) => {
                    self.last_row_desc = Some(rd);
                    break;
                }
                NoData(_) => {
                    self.last_row_desc = None;
                    break;
                }
                f => return Err(f.unexpected("prepare").into()),
            }
        }

        conn.register_stmt(&self.prepared_name);
        Ok(())
    }

    /// Run the statement and buffer every result set.
    pub async fn query(
        &mut self,
        conn: &mut Connection,
        ctx: &mut QueryContext,
        params: &[Param],
    ) -> Result<MultiResult> {
        verbose!("query: {}", self.command);

        if self.parse_state == ParseState::Parsed {
            self.bind_and_execute(conn, params);
            self.collect_results(conn, ctx).await
        } else {
            let cmd = self.interpolate(params);
            conn.send(frontend::Query { sql: &cmd });
            conn.flush().await?;
            self.drain_simple(conn, ctx).await
        }
    }

    /// Run the statement and report the affected row count: the first
    /// column of the single result row.
    pub async fn execute(
        &mut self,
        conn: &mut Connection,
        ctx: &mut QueryContext,
        params: &[Param],
    ) -> Result<u64> {
        let mut result = self.query(conn, ctx, params).await?;
        let affected = result.rows_affected()?;
        result.close()?;
        Ok(affected)
    }

    /// Release the server-side statement.
    ///
    /// Best-effort when the connection is in an error state: the close
    /// and sync are buffered and the pending train is drained lazily.
    pub async fn close(&mut self, conn: &mut Connection) -> Result<()> {
        if self.parse_state != ParseState::Parsed {
            return Ok(());
        }

        conn.close_stmt(&self.prepared_name);
        self.parse_state = ParseState::Unparsed;
        conn.flush().await?;
        Ok(())
    }

    /// Substitute arguments literally into the SQL text.
    fn interpolate(&self, params: &[Param]) -> String {
        if self.num_params == 0 {
            return self.command.clone();
        }

        let mut args = params.iter();
        sql::rewrite_positional(&self.command, || match args.next() {
            Some(param) => param.literal(),
            // leave unmatched placeholders for the server to reject
            None => "?".to_string(),
        })
    }

    /// Buffer the Bind/Execute/Flush train for one execution.
    fn bind_and_execute(&self, conn: &mut Connection, params: &[Param]) {
        let args: Vec<Option<String>> = params.iter().map(Param::bind_text).collect();

        conn.send(frontend::Bind {
            portal_name: "",
            stmt_name: &self.prepared_name,
            param_oids: &self.param_oids,
            args: &args,
        });
        conn.send(frontend::Execute {
            portal_name: "",
            max_row: 0,
        });
        conn.send(frontend::Flush);
    }

    /// Drain the extended-protocol response train into result sets.
    ///
    /// The train ends at the first synchronization marker; with the
    /// flush-based flow that is CommandComplete or PortalSuspended for a
    /// successful execution.
    async fn collect_results(
        &mut self,
        conn: &mut Connection,
        ctx: &mut QueryContext,
    ) -> Result<MultiResult> {
        let tz_offset = conn.tz_offset().to_string();
        let mut sets: Vec<RowSet> = Vec::new();
        let mut current = self
            .last_row_desc
            .clone()
            .map(|rd| RowSet::new(rd, &tz_offset, ctx.in_mem_row_limit));

        loop {
            use crate::protocol::backend::BackendMessage::*;
            let received = conn.recv_ctx(ctx).await;
            match received.map_err(|err| abort_extended(conn, err))? {
                DataRow(dr) => match current.as_mut() {
                    Some(set) => set.add_row(dr),
                    None => return Err(Error::protocol_desync("data row without a description")),
                },
                RowDescription(rd) => {
                    if let Some(mut done) = current.take() {
                        done.finalize()?;
                        sets.push(done);
                    }
                    self.last_row_desc = Some(rd.clone());
                    current = Some(RowSet::new(rd, &tz_offset, ctx.in_mem_row_limit));
                }
                CommandComplete(_) | PortalSuspended(_) | ReadyForQuery(_) => break,
                EmptyQueryResponse(_) => return Ok(MultiResult::single(RowSet::empty())),
                CopyInResponse(_) => conn.run_copy_in(ctx).await?,
                BindComplete(_) | CommandDescription(_) | ParseComplete(_) | NoData(_)
                | ParameterDescription(_) => {}
                f => return Err(f.unexpected("collecting results").into()),
            }
        }

        let mut current = current.unwrap_or_else(RowSet::empty);
        current.finalize()?;
        sets.push(current);
        Ok(MultiResult::new(sets))
    }

    /// Drain a simple-query response train, one result set per statement
    /// in the batch, until ReadyForQuery.
    async fn drain_simple(
        &mut self,
        conn: &mut Connection,
        ctx: &mut QueryContext,
    ) -> Result<MultiResult> {
        let tz_offset = conn.tz_offset().to_string();
        let mut sets: Vec<RowSet> = Vec::new();
        let mut current: Option<RowSet> = None;

        loop {
            use crate::protocol::backend::BackendMessage::*;
            let received = conn.recv_ctx(ctx).await;
            match received.map_err(|err| abort_simple(conn, err))? {
                DataRow(dr) => match current.as_mut() {
                    Some(set) => set.add_row(dr),
                    None => return Err(Error::protocol_desync("data row without a description")),
                },
                RowDescription(rd) => {
                    if let Some(mut done) = current.take() {
                        done.finalize()?;
                        sets.push(done);
                    }
                    current = Some(RowSet::new(rd, &tz_offset, ctx.in_mem_row_limit));
                }
                CommandComplete(_) => {
                    let mut done = current.take().unwrap_or_else(RowSet::empty);
                    done.finalize()?;
                    sets.push(done);
                }
                EmptyQueryResponse(_) => {
                    conn.ready_request();
                    return Ok(MultiResult::single(RowSet::empty()));
                }
                CopyInResponse(_) => conn.run_copy_in(ctx).await?,
                ReadyForQuery(_) | PortalSuspended(_) => break,
                BindComplete(_) | CommandDescription(_) | ParseComplete(_) | NoData(_)
                | ParameterDescription(_) => {}
                f => return Err(f.unexpected("simple query").into()),
            }
        }

        if let Some(mut done) = current.take() {
            done.finalize()?;
            sets.push(done);
        }
        if sets.is_empty() {
            sets.push(RowSet::empty());
        }
        Ok(MultiResult::new(sets))
    }
}

/// A server error mid-extended-train leaves the backend discarding
/// messages until a Sync arrives; send one so the session can recover.
/// Transport and protocol errors are fatal to the connection and get no
/// resync.
fn abort_extended(conn: &mut Connection, err: Error) -> Error {
    if err.as_database_error().is_some() {
        conn.resync();
    }
    err
}

/// A server error in simple-query mode is followed by the backend's own
/// ReadyForQuery, no client Sync required; register that one marker.
fn abort_simple(conn: &mut Connection, err: Error) -> Error {
    if err.as_database_error().is_some() {
        conn.ready_request();
    }
    err
}

/// Server-side statement names carry the process id plus a time and a
/// random component, so driver instances sharing a server cannot collide.
fn next_statement_name() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    format!("S{}{}{}", std::process::id(), secs, rand::random::<u32>())
}

#[cfg(test)]
mod test {
    use super::*;

    fn stmt(sql: &str) -> Statement {
        Statement::new(sql).unwrap()
    }

    #[test]
    fn empty_statement_rejected() {
        let err = Statement::new("").unwrap_err();
        assert!(matches!(err.kind(), crate::ErrorKind::EmptyStatement));
        assert_eq!(format!("{:#}", err.kind()), "empty statement");

        assert!(Statement::new("   \n\t").is_err());
    }

    #[test]
    fn named_placeholders_rewritten_at_construction() {
        let s = stmt("select * from t where a = @first and b = @second");
        assert_eq!(s.command(), "select * from t where a = ? and b = ?");
        assert_eq!(s.named_params(), ["FIRST", "SECOND"]);
        assert_eq!(s.num_input(), 2);
    }

    #[test]
    fn num_input_ignores_quoted_marks() {
        let s = stmt("select ? from t where b = '?fooledYou'");
        assert_eq!(s.num_input(), 1);
    }

    #[test]
    fn interpolate_cases() {
        let cases: &[(&str, &[Param], &str)] = &[
            ("select * from something", &[], "select * from something"),
            (
                "select * from something where value = ?",
                &[Param::Str("taco".into())],
                "select * from something where value = 'taco'",
            ),
            (
                "select * from something where value = ? and otherVal = ?",
                &[Param::Str("taco".into()), Param::Float(15.5)],
                "select * from something where value = 'taco' and otherVal = 15.5",
            ),
            (
                "select * from something where value = ?",
                &[Param::Str("it's other's".into())],
                "select * from something where value = 'it''s other''s'",
            ),
            (
                "select * from something where value = ?",
                &[Param::Str("it''s other''s".into())],
                "select * from something where value = 'it''s other''s'",
            ),
            (
                "select * from t where a = ? and b = ?",
                &[Param::Int(1), Param::Null],
                "select * from t where a = 1 and b = NULL",
            ),
        ];

        for (sql_text, params, expect) in cases {
            assert_eq!(&stmt(sql_text).interpolate(params), expect);
        }
    }

    #[test]
    fn interpolate_leaves_unmatched_placeholders() {
        let s = stmt("select ? , ?");
        assert_eq!(s.interpolate(&[Param::Int(1)]), "select 1 , ?");
    }

    #[test]
    fn statement_names_are_unique() {
        let names: std::collections::HashSet<String> =
            (0..64).map(|_| next_statement_name()).collect();
        assert_eq!(names.len(), 64);
        assert!(names.iter().all(|n| n.starts_with('S')));
    }
}
