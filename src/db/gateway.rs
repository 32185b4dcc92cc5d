//! Dynamic data-access gateway.
//!
//! The gateway plans SQL for function, procedure and scalar invocations,
//! opens a session for each public operation and releases it when the
//! operation ends: on success, failure, timeout, or when the operation
//! future is dropped. Bound function and procedure calls first look up the
//! target's declared argument types on the same session.

use crate::config::{ArgumentMode, LocaleSettings};
use crate::db::catalog::{argument_type_query, argument_types};
use crate::db::connection::{Connector, PgConnector, Session};
use crate::db::encoder::{Statement, plan, plan_typed};
use crate::error::{DbResult, ErrorKind, GatewayError};
use crate::models::{
    FromScalar, InvocationRequest, Outcome, Parameter, SqlValue, TabularResult,
};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

/// Per-gateway execution settings.
#[derive(Debug, Clone, Default)]
pub struct GatewayOptions {
    pub argument_mode: ArgumentMode,
    /// `None` disables the limit
    pub statement_timeout: Option<Duration>,
    pub locale: LocaleSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closed,
}

/// Turns invocation requests into executed SQL.
///
/// Holds at most one session at a time; operations on a shared gateway run
/// one after another.
pub struct Gateway<C: Connector = PgConnector> {
    connector: C,
    options: GatewayOptions,
    session: Mutex<Option<C::Session>>,
}

impl<C: Connector> Gateway<C> {
    pub fn new(connector: C, options: GatewayOptions) -> Self {
        Self {
            connector,
            options,
            session: Mutex::new(None),
        }
    }

    pub fn options(&self) -> &GatewayOptions {
        &self.options
    }

    /// `Open` while an operation holds a session.
    pub fn state(&self) -> ConnectionState {
        match self.session.try_lock() {
            Ok(slot) if slot.is_none() => ConnectionState::Closed,
            _ => ConnectionState::Open,
        }
    }

    /// Release any residual session.
    pub async fn close(&self) -> DbResult<()> {
        let mut slot = self.session.lock().await;
        match slot.take() {
            Some(session) => session.close().await,
            None => Ok(()),
        }
    }

    /// `SELECT * FROM name(p1 => v1, ...)`, returning every row.
    pub async fn invoke_function(
        &self,
        name: &str,
        parameters: &[Parameter],
    ) -> DbResult<TabularResult> {
        let request = InvocationRequest::function(name).with_params(parameters.iter().cloned());
        self.invoke(&request).await
    }

    /// `CALL name(p1 => $1, ...)`, returning any rows the call yields.
    pub async fn invoke_procedure(
        &self,
        name: &str,
        parameters: &[Parameter],
    ) -> DbResult<TabularResult> {
        let request = InvocationRequest::procedure(name).with_params(parameters.iter().cloned());
        self.invoke(&request).await
    }

    /// Run `query` with positional binds and convert the first column of
    /// the first row.
    pub async fn invoke_scalar<T: FromScalar>(
        &self,
        query: &str,
        parameters: &[Parameter],
    ) -> DbResult<T> {
        let request = InvocationRequest::scalar(query).with_params(parameters.iter().cloned());
        let statement = plan(&request, self.options.argument_mode, &self.options.locale)?;
        debug!(
            sql = %statement.sql,
            binds = ?bind_kinds(&statement),
            target = T::KIND,
            "Invoking scalar query"
        );

        let result = match self.fetch_scalar("scalar query", &statement).await {
            Ok(Some(value)) => T::from_scalar(value),
            Ok(None) => Err(GatewayError::null_result(request.target.trim())),
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            log_failure(&request, e);
        }
        result
    }

    /// Execute any invocation and materialize its rows.
    pub async fn invoke(&self, request: &InvocationRequest) -> DbResult<TabularResult> {
        // planned before connecting so invalid requests never open a session
        let planned = plan(request, self.options.argument_mode, &self.options.locale)?;

        let start = Instant::now();
        let result = self.fetch_all(request, planned).await;
        match &result {
            Ok(table) => debug!(
                rows = table.row_count(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Invocation complete"
            ),
            Err(e) => log_failure(request, e),
        }
        result
    }

    /// Like [`invoke`](Self::invoke) but tagged rows / empty / failed.
    pub async fn invoke_outcome(&self, request: &InvocationRequest) -> Outcome {
        Outcome::from(self.invoke(request).await)
    }

    async fn open(&self) -> DbResult<SessionGuard<'_, C::Session>> {
        let mut slot = self.session.lock().await;
        if let Some(stale) = slot.take() {
            if let Err(e) = stale.close().await {
                warn!(error = %e, "Failed to close stale session");
            }
        }
        *slot = Some(self.connector.connect().await?);
        Ok(SessionGuard { slot })
    }

    async fn fetch_all(
        &self,
        request: &InvocationRequest,
        planned: Statement,
    ) -> DbResult<TabularResult> {
        let mut guard = self.open().await?;
        let session = guard.session()?;
        let operation = request.kind.to_string();
        let result = self
            .limited(&operation, async move {
                let statement = self.with_declared_types(session, request, planned).await?;
                debug!(
                    kind = %request.kind,
                    sql = %statement.sql,
                    binds = ?bind_kinds(&statement),
                    "Invoking"
                );
                session.fetch_all(&statement).await
            })
            .await;
        guard.finish(&result).await;
        result
    }

    /// Re-plan with the target's argument types when any bound argument
    /// lacks one. A failed lookup leaves the statement as planned.
    async fn with_declared_types(
        &self,
        session: &mut C::Session,
        request: &InvocationRequest,
        planned: Statement,
    ) -> DbResult<Statement> {
        let Some(lookup) = argument_type_query(request, self.options.argument_mode) else {
            return Ok(planned);
        };
        let declared = match session.fetch_all(&lookup).await {
            Ok(rows) => argument_types(&rows),
            Err(e) => {
                warn!(
                    target = %request.target.trim(),
                    error = %e,
                    "Argument type lookup failed; binding untyped"
                );
                return Ok(planned);
            }
        };
        if declared.is_empty() {
            return Ok(planned);
        }
        plan_typed(
            request,
            self.options.argument_mode,
            &self.options.locale,
            &declared,
        )
    }

    async fn fetch_scalar(
        &self,
        operation: &str,
        statement: &Statement,
    ) -> DbResult<Option<serde_json::Value>> {
        let mut guard = self.open().await?;
        let result = self
            .limited(operation, guard.session()?.fetch_scalar(statement))
            .await;
        guard.finish(&result).await;
        result
    }

    async fn limited<T>(
        &self,
        operation: &str,
        fut: impl Future<Output = DbResult<T>>,
    ) -> DbResult<T> {
        match self.options.statement_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| GatewayError::timeout(operation, limit))?,
            None => fut.await,
        }
    }
}

fn bind_kinds(statement: &Statement) -> Vec<&'static str> {
    statement.binds.iter().map(SqlValue::kind_name).collect()
}

fn log_failure(request: &InvocationRequest, err: &GatewayError) {
    warn!(
        kind = %err.kind(),
        target = %request.target.trim(),
        error = %err,
        suggestion = err.suggestion().unwrap_or_default(),
        retryable = err.is_retryable(),
        "Invocation failed"
    );
}

impl<C: Connector + std::fmt::Debug> std::fmt::Debug for Gateway<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("connector", &self.connector)
            .field("options", &self.options)
            .field("state", &self.state())
            .finish()
    }
}

/// Owns the session slot for the duration of one operation.
///
/// Dropping the guard without [`finish`](Self::finish) (a cancelled
/// operation) still drops the session.
struct SessionGuard<'a, S: Session> {
    slot: MutexGuard<'a, Option<S>>,
}

impl<S: Session> SessionGuard<'_, S> {
    fn session(&mut self) -> DbResult<&mut S> {
        self.slot.as_mut().ok_or_else(|| {
            GatewayError::connection("Session is not open", "Retry the operation")
        })
    }

    async fn finish<T>(mut self, result: &DbResult<T>) {
        let Some(session) = self.slot.take() else {
            return;
        };
        // a timed-out session may be mid-statement; drop the socket instead
        if matches!(result, Err(e) if e.kind() == ErrorKind::Timeout) {
            drop(session);
            return;
        }
        if let Err(e) = session.close().await {
            warn!(error = %e, "Failed to close session cleanly");
        }
    }
}

impl<S: Session> Drop for SessionGuard<'_, S> {
    fn drop(&mut self) {
        if self.slot.take().is_some() {
            warn!("Operation dropped before completion; discarding session");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnMetadata, Row, SqlValue};
    use serde_json::{Value as JsonValue, json};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex as StdMutex};

    #[derive(Clone)]
    enum Behavior {
        Rows(TabularResult),
        Scalar(Option<JsonValue>),
        Fail,
        Hang,
        RefuseConnect,
    }

    #[derive(Clone)]
    struct FakeConnector {
        behavior: Behavior,
        // answers argument type lookups; `None` makes them fail
        catalog: Option<TabularResult>,
        opened: Arc<AtomicUsize>,
        closed: Arc<AtomicUsize>,
        live: Arc<AtomicUsize>,
        executed: Arc<StdMutex<Vec<Statement>>>,
    }

    impl FakeConnector {
        fn new(behavior: Behavior) -> Self {
            Self {
                behavior,
                catalog: Some(TabularResult::empty()),
                opened: Arc::new(AtomicUsize::new(0)),
                closed: Arc::new(AtomicUsize::new(0)),
                live: Arc::new(AtomicUsize::new(0)),
                executed: Arc::new(StdMutex::new(Vec::new())),
            }
        }

        fn with_catalog(mut self, catalog: Option<TabularResult>) -> Self {
            self.catalog = catalog;
            self
        }

        fn live(&self) -> usize {
            self.live.load(Ordering::SeqCst)
        }

        fn last_sql(&self) -> String {
            self.executed.lock().unwrap().last().unwrap().sql.clone()
        }
    }

    struct FakeSession {
        connector: FakeConnector,
    }

    impl Drop for FakeSession {
        fn drop(&mut self) {
            self.connector.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl FakeSession {
        async fn run(&mut self, statement: &Statement) -> DbResult<Behavior> {
            self.connector
                .executed
                .lock()
                .unwrap()
                .push(statement.clone());
            if statement.sql.contains("pg_catalog.pg_proc") {
                return match &self.connector.catalog {
                    Some(types) => Ok(Behavior::Rows(types.clone())),
                    None => Err(GatewayError::execution(
                        "permission denied for table pg_proc",
                        Some("42501".to_string()),
                        "grant access",
                    )),
                };
            }
            match &self.connector.behavior {
                Behavior::Fail => Err(GatewayError::execution(
                    "function does not exist",
                    Some("42883".to_string()),
                    "check the name",
                )),
                Behavior::Hang => std::future::pending().await,
                other => Ok(other.clone()),
            }
        }
    }

    impl Connector for FakeConnector {
        type Session = FakeSession;

        async fn connect(&self) -> DbResult<FakeSession> {
            if matches!(self.behavior, Behavior::RefuseConnect) {
                return Err(GatewayError::connection("refused", "start the server"));
            }
            self.opened.fetch_add(1, Ordering::SeqCst);
            self.live.fetch_add(1, Ordering::SeqCst);
            Ok(FakeSession {
                connector: self.clone(),
            })
        }
    }

    impl Session for FakeSession {
        async fn fetch_all(&mut self, statement: &Statement) -> DbResult<TabularResult> {
            match self.run(statement).await? {
                Behavior::Rows(table) => Ok(table),
                _ => Ok(TabularResult::empty()),
            }
        }

        async fn fetch_scalar(&mut self, statement: &Statement) -> DbResult<Option<JsonValue>> {
            match self.run(statement).await? {
                Behavior::Scalar(value) => Ok(value),
                _ => Ok(None),
            }
        }

        async fn close(self) -> DbResult<()> {
            self.connector.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn gateway(behavior: Behavior) -> (Gateway<FakeConnector>, FakeConnector) {
        let connector = FakeConnector::new(behavior);
        (
            Gateway::new(connector.clone(), GatewayOptions::default()),
            connector,
        )
    }

    fn catalog_rows(pairs: &[(&str, &str)]) -> TabularResult {
        let rows = pairs
            .iter()
            .map(|(name, type_name)| {
                [
                    ("name".to_string(), json!(name)),
                    ("type_name".to_string(), json!(type_name)),
                ]
                .into_iter()
                .collect::<Row>()
            })
            .collect();
        TabularResult::new(Vec::new(), rows)
    }

    fn one_row() -> TabularResult {
        let row: Row = [("id".to_string(), json!(1)), ("navn".to_string(), json!("A"))]
            .into_iter()
            .collect();
        TabularResult::new(
            vec![
                ColumnMetadata::new("id", "INT4"),
                ColumnMetadata::new("navn", "TEXT"),
            ],
            vec![row],
        )
    }

    #[tokio::test]
    async fn test_function_rows_and_connection_closed() {
        let (gw, fake) = gateway(Behavior::Rows(one_row()));
        let result = gw
            .invoke_function("kenosis.fn_get_applikationer()", &[])
            .await
            .unwrap();

        assert_eq!(result.row_count(), 1);
        assert_eq!(fake.last_sql(), "SELECT * FROM kenosis.fn_get_applikationer()");
        assert_eq!(fake.opened.load(Ordering::SeqCst), 1);
        assert_eq!(fake.closed.load(Ordering::SeqCst), 1);
        assert_eq!(fake.live(), 0);
        assert_eq!(gw.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_zero_rows_is_success() {
        let (gw, fake) = gateway(Behavior::Rows(TabularResult::empty()));
        let request = InvocationRequest::function("kenosis.fn_get_applikationer()");
        assert!(matches!(gw.invoke_outcome(&request).await, Outcome::Empty));
        assert_eq!(fake.live(), 0);
    }

    #[tokio::test]
    async fn test_failure_is_distinct_and_connection_closed() {
        let (gw, fake) = gateway(Behavior::Fail);
        let request = InvocationRequest::function("kenosis.fn_missing");
        let outcome = gw.invoke_outcome(&request).await;

        assert_eq!(outcome.failure_kind(), Some(ErrorKind::ExecutionFailure));
        assert_eq!(fake.closed.load(Ordering::SeqCst), 1);
        assert_eq!(fake.live(), 0);
        assert_eq!(gw.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let (gw, _) = gateway(Behavior::RefuseConnect);
        let err = gw.invoke_function("f", &[]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionFailure);
        assert_eq!(gw.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_blank_name_never_connects() {
        let (gw, fake) = gateway(Behavior::Rows(one_row()));
        let err = gw.invoke_function("   ", &[]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = gw.invoke_scalar::<i32>("", &[]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        assert_eq!(fake.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_function_arguments_are_bound_by_default() {
        let (gw, fake) = gateway(Behavior::Rows(TabularResult::empty()));
        let params = [
            Parameter::new("p_id", 5),
            Parameter::new("p_name", "O'Hara"),
        ];
        gw.invoke_function("public.fn_find", &params).await.unwrap();

        let executed = fake.executed.lock().unwrap().last().cloned().unwrap();
        assert_eq!(
            executed.sql,
            "SELECT * FROM public.fn_find(p_id => $1, p_name => $2)"
        );
        assert_eq!(
            executed.binds,
            vec![SqlValue::Int(5), SqlValue::Text("O'Hara".into())]
        );
    }

    #[tokio::test]
    async fn test_inline_mode_encodes_literals() {
        let fake = FakeConnector::new(Behavior::Rows(TabularResult::empty()));
        let options = GatewayOptions {
            argument_mode: ArgumentMode::Inline,
            ..GatewayOptions::default()
        };
        let gw = Gateway::new(fake.clone(), options);
        let params = [Parameter::new("p_name", "O'Hara")];
        gw.invoke_function("public.fn_find", &params).await.unwrap();
        assert_eq!(
            fake.last_sql(),
            "SELECT * FROM public.fn_find(p_name => 'O''Hara')"
        );
    }

    #[tokio::test]
    async fn test_procedure_call_shape() {
        let (gw, fake) = gateway(Behavior::Rows(TabularResult::empty()));
        gw.invoke_procedure("kenosis.sp_sync", &[Parameter::new("p_force", true)])
            .await
            .unwrap();
        assert_eq!(fake.last_sql(), "CALL kenosis.sp_sync(p_force => $1)");
        assert_eq!(fake.live(), 0);
    }

    #[tokio::test]
    async fn test_scalar_value() {
        let (gw, fake) = gateway(Behavior::Scalar(Some(json!(12))));
        let count: i32 = gw
            .invoke_scalar("SELECT kenosis.fn_get_antal_applikationer()", &[])
            .await
            .unwrap();
        assert_eq!(count, 12);
        assert_eq!(fake.live(), 0);
    }

    #[tokio::test]
    async fn test_scalar_null_is_null_result() {
        let (gw, fake) = gateway(Behavior::Scalar(None));
        let err = gw
            .invoke_scalar::<i64>("SELECT NULL::int8", &[])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NullResult);
        assert_eq!(fake.closed.load(Ordering::SeqCst), 1);
        assert_eq!(fake.live(), 0);
    }

    #[tokio::test]
    async fn test_scalar_type_mismatch() {
        let (gw, _) = gateway(Behavior::Scalar(Some(json!("not a number"))));
        let err = gw.invoke_scalar::<i32>("SELECT 'x'", &[]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
    }

    #[tokio::test]
    async fn test_statement_timeout_releases_session() {
        let fake = FakeConnector::new(Behavior::Hang);
        let options = GatewayOptions {
            statement_timeout: Some(Duration::from_millis(20)),
            ..GatewayOptions::default()
        };
        let gw = Gateway::new(fake.clone(), options);

        let err = gw.invoke_function("f", &[]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(fake.live(), 0);
        // dropped, not closed cleanly
        assert_eq!(fake.closed.load(Ordering::SeqCst), 0);
        assert_eq!(gw.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_cancelled_operation_releases_session() {
        let (gw, fake) = gateway(Behavior::Hang);
        let cancelled =
            tokio::time::timeout(Duration::from_millis(20), gw.invoke_function("f", &[])).await;
        assert!(cancelled.is_err());
        assert_eq!(fake.opened.load(Ordering::SeqCst), 1);
        assert_eq!(fake.live(), 0);
        assert_eq!(gw.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_sequential_operations_reuse_nothing() {
        let (gw, fake) = gateway(Behavior::Rows(one_row()));
        for _ in 0..3 {
            gw.invoke_function("f", &[]).await.unwrap();
        }
        assert_eq!(fake.opened.load(Ordering::SeqCst), 3);
        assert_eq!(fake.closed.load(Ordering::SeqCst), 3);
        gw.close().await.unwrap();
        assert_eq!(gw.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_bound_arguments_cast_to_declared_types() {
        let fake = FakeConnector::new(Behavior::Rows(one_row())).with_catalog(Some(
            catalog_rows(&[("p_day", "date"), ("p_amount", "numeric")]),
        ));
        let gw = Gateway::new(fake.clone(), GatewayOptions::default());
        let params = [
            Parameter::new("p_day", "2024-03-09"),
            Parameter::new("p_amount", 1.5),
            Parameter::new("p_note", None::<String>),
        ];
        gw.invoke_function("public.fn_on", &params).await.unwrap();

        let executed = fake.executed.lock().unwrap().clone();
        assert_eq!(executed.len(), 2);
        assert!(executed[0].sql.contains("pg_catalog.pg_proc"));
        assert_eq!(
            executed[1].sql,
            "SELECT * FROM public.fn_on(p_day => $1::date, p_amount => $2::numeric, p_note => NULL)"
        );
        // lookup and call share one session
        assert_eq!(fake.opened.load(Ordering::SeqCst), 1);
        assert_eq!(fake.live(), 0);
    }

    #[tokio::test]
    async fn test_failed_type_lookup_still_runs_the_call() {
        let fake = FakeConnector::new(Behavior::Rows(one_row())).with_catalog(None);
        let gw = Gateway::new(fake.clone(), GatewayOptions::default());
        let result = gw
            .invoke_function("public.fn_on", &[Parameter::new("p_day", "2024-03-09")])
            .await
            .unwrap();
        assert_eq!(result.row_count(), 1);
        assert_eq!(fake.last_sql(), "SELECT * FROM public.fn_on(p_day => $1)");
    }

    #[tokio::test]
    async fn test_inout_procedure_argument_is_cast() {
        let fake = FakeConnector::new(Behavior::Rows(TabularResult::empty()))
            .with_catalog(Some(catalog_rows(&[("p_x", "integer")])));
        let gw = Gateway::new(fake.clone(), GatewayOptions::default());
        gw.invoke_procedure("sp_double", &[Parameter::new("p_x", 21)])
            .await
            .unwrap();
        assert_eq!(fake.last_sql(), "CALL sp_double(p_x => $1::integer)");
    }

    #[tokio::test]
    async fn test_declared_parameter_types_skip_the_lookup() {
        let (gw, fake) = gateway(Behavior::Rows(TabularResult::empty()));
        let params = [Parameter::new("p_mood", "happy").typed("public.mood")];
        gw.invoke_function("public.fn_by_mood", &params).await.unwrap();

        let executed = fake.executed.lock().unwrap().clone();
        assert_eq!(executed.len(), 1);
        assert_eq!(
            executed[0].sql,
            "SELECT * FROM public.fn_by_mood(p_mood => $1::public.mood)"
        );
    }

    #[tokio::test]
    async fn test_sub_second_timeout_is_reported() {
        let fake = FakeConnector::new(Behavior::Hang);
        let options = GatewayOptions {
            statement_timeout: Some(Duration::from_millis(20)),
            ..GatewayOptions::default()
        };
        let gw = Gateway::new(fake, options);
        let err = gw.invoke_function("f", &[]).await.unwrap_err();
        assert_eq!(err.to_string(), "Timeout: function exceeded 20ms");
    }
}
