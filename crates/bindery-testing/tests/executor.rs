//! Query executor dispatch: all, first, scalar and status.
//!
//! ```bash
//! cargo test -p bindery-testing --test executor
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use bindery::{
    Bind, Database, EngineConfig, Error, ExecutionOptions, Params, RowModel, SqlValue, Statement,
    executor_for, params,
};
use bindery_pool::PoolConfig;
use bindery_testing::{MockBackend, MockResponse, TestEngine};

struct UserModel;

impl RowModel for UserModel {
    fn name(&self) -> &str {
        "User"
    }
}

fn users_backend() -> MockBackend {
    MockBackend::new()
        .with_response(
            "SELECT id, name FROM users WHERE org = $1",
            MockResponse::rows(
                ["id", "name"],
                vec![
                    vec![SqlValue::BigInt(1), SqlValue::from("ada")],
                    vec![SqlValue::BigInt(2), SqlValue::from("grace")],
                ],
            ),
        )
        .with_response("SELECT count(*) FROM users", MockResponse::scalar(2i64))
        .with_response(
            "UPDATE users SET active = $1",
            MockResponse::status("UPDATE 3"),
        )
}

// =============================================================================
// Dispatch modes
// =============================================================================

#[tokio::test]
async fn test_all_returns_every_row() {
    let t = TestEngine::new(users_backend(), 2).await.unwrap();
    let users = t.engine.statement("SELECT id, name FROM users WHERE org = :org");

    let rows = t
        .engine
        .all(&users, Params::new().named("org", "acme"))
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].get_by_name::<String>("name").unwrap(), "grace");
    assert_eq!(t.dialect.methods(), vec!["all"]);
    assert_eq!(t.engine.pool_status().in_use, 0);
}

#[tokio::test]
async fn test_all_on_no_rows_is_empty() {
    let t = TestEngine::new(MockBackend::new(), 1).await.unwrap();
    let rows = t
        .engine
        .all(&Statement::new("SELECT * FROM empty"), ())
        .await
        .unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_first_on_no_rows_is_none() {
    let t = TestEngine::new(MockBackend::new(), 1).await.unwrap();
    let row = t
        .engine
        .first(&Statement::new("SELECT * FROM empty"), ())
        .await
        .unwrap();
    assert!(row.is_none());
    assert_eq!(t.dialect.methods(), vec!["first"]);
}

#[tokio::test]
async fn test_first_returns_first_row() {
    let t = TestEngine::new(users_backend(), 1).await.unwrap();
    let users = Statement::new("SELECT id, name FROM users WHERE org = :org");
    let row = t
        .engine
        .first(&users, Params::new().named("org", "acme"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.get::<i64>(0).unwrap(), 1);
}

#[tokio::test]
async fn test_scalar() {
    let t = TestEngine::new(users_backend(), 1).await.unwrap();
    let count = Statement::new("SELECT count(*) FROM users");

    let value = t.engine.scalar(&count, ()).await.unwrap();
    assert_eq!(value, Some(SqlValue::BigInt(2)));

    let typed = t.engine.executor(&count).scalar_as::<i64>(()).await.unwrap();
    assert_eq!(typed, Some(2));

    let missing = t
        .engine
        .scalar(&Statement::new("SELECT 1 WHERE false"), ())
        .await
        .unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn test_status_reports_rows_affected() {
    let t = TestEngine::new(users_backend(), 1).await.unwrap();
    let update = Statement::new("UPDATE users SET active = $1");

    let status = t.engine.status(&update, params![true]).await.unwrap();
    assert_eq!(status.rows_affected, 3);
    assert_eq!(status.command(), "UPDATE");
    assert_eq!(t.dialect.methods(), vec!["status"]);
}

#[tokio::test]
async fn test_typed_rows() {
    let t = TestEngine::new(users_backend(), 1).await.unwrap();
    let users = t.engine.statement("SELECT id, name FROM users WHERE org = :org");
    let executor = executor_for(&users);

    let all: Vec<(i64, String)> = executor
        .all_as(Params::new().named("org", "acme"))
        .await
        .unwrap();
    assert_eq!(all, vec![(1, "ada".to_string()), (2, "grace".to_string())]);

    let first: Option<(i64,)> = executor
        .first_as(Params::new().named("org", "acme"))
        .await
        .unwrap();
    assert_eq!(first, Some((1,)));
}

// =============================================================================
// Binds and options
// =============================================================================

#[tokio::test]
async fn test_no_bind() {
    let result = executor_for(&Statement::new("SELECT 1")).all(()).await;
    assert!(matches!(result, Err(Error::NoBind)));

    let result = executor_for(&Statement::new("SELECT 1")).iterate(()).cursor().next().await;
    assert!(matches!(result, Err(Error::NoBind)));
}

#[tokio::test]
async fn test_executor_bind_overrides_statement_bind() {
    let first = TestEngine::new(users_backend(), 1).await.unwrap();
    let second = TestEngine::new(users_backend(), 1).await.unwrap();
    let count = first.engine.statement("SELECT count(*) FROM users");

    executor_for(&count)
        .bind(&second.engine)
        .scalar(())
        .await
        .unwrap();
    assert!(first.backend.statements().is_empty());
    assert_eq!(second.backend.statements(), vec!["SELECT count(*) FROM users"]);
}

#[tokio::test]
async fn test_model_binding() {
    let t = TestEngine::new(users_backend(), 1).await.unwrap();
    let users = t.engine.statement("SELECT id, name FROM users WHERE org = :org");
    let model = Arc::new(UserModel);
    let params = || Params::new().named("org", "acme");

    let rows = executor_for(&users).model(&model).all(params()).await.unwrap();
    assert!(rows.iter().all(|row| row.model() == Some("User")));

    let rows = executor_for(&users)
        .model(&model)
        .return_model(false)
        .all(params())
        .await
        .unwrap();
    assert!(rows.iter().all(|row| row.model().is_none()));

    // Statements hold the model weakly; a dropped model stops applying.
    let bound = executor_for(&users).model(&model);
    drop(model);
    let rows = bound.all(params()).await.unwrap();
    assert!(rows.iter().all(|row| row.model().is_none()));

    let calls = t.dialect.calls();
    assert!(calls[0].has_model && calls[0].return_model);
    assert!(calls[1].has_model && !calls[1].return_model);
    assert!(calls[2].has_model && calls[2].return_model);
}

#[tokio::test]
async fn test_builder_calls_do_not_mutate_statement() {
    let statement = Statement::new("SELECT 1");
    let model = Arc::new(UserModel);
    let executor = executor_for(&statement)
        .model(&model)
        .timeout(Duration::from_secs(1));

    assert!(executor.statement().options().has_model());
    assert_eq!(executor.statement().options().timeout(), Some(Duration::from_secs(1)));
    assert!(!statement.options().has_model());
    assert!(statement.options().timeout().is_none());
}

// =============================================================================
// Spawned tasks
// =============================================================================

fn assert_send<T: Send>(_: &T) {}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_operations_run_on_spawned_tasks() {
    let t = TestEngine::new(users_backend(), 2).await.unwrap();
    let users = t.engine.statement("SELECT id, name FROM users WHERE org = :org");
    let executor = executor_for(&users);
    let org = || Params::new().named("org", "acme");

    assert_send(&executor.all(org()));
    assert_send(&executor.first(org()));
    assert_send(&executor.scalar(org()));
    assert_send(&executor.status(org()));
    assert_send(&executor.iterate(org()).stream());
    assert_send(&t.engine.transaction().run(|| async { Ok::<_, Error>(()) }));

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let executor = executor.clone();
            tokio::spawn(async move { executor.all(Params::new().named("org", "acme")).await })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap().len(), 2);
    }
    assert_eq!(t.engine.pool_status().in_use, 0);
    assert!(t.engine.pool_status().total <= 2);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_statement_error_passes_through() {
    let backend = MockBackend::new().with_response(
        "SELECT * FROM missing",
        MockResponse::error("42P01", "relation \"missing\" does not exist"),
    );
    let t = TestEngine::new(backend, 1).await.unwrap();

    let err = t
        .engine
        .all(&Statement::new("SELECT * FROM missing"), ())
        .await
        .unwrap_err();
    assert!(err.is_statement_error());
    assert_eq!(err.code(), Some("42P01"));
    assert_eq!(t.engine.pool_status().in_use, 0);
}

#[tokio::test]
async fn test_connection_error_passes_through() {
    let backend = MockBackend::new().with_response(
        "SELECT 1",
        MockResponse::ConnectionLost("server closed the connection".into()),
    );
    let t = TestEngine::new(backend, 1).await.unwrap();

    let err = t.engine.scalar(&Statement::new("SELECT 1"), ()).await.unwrap_err();
    assert!(matches!(err, Error::Connection(ref m) if m.contains("server closed")));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_timeout_releases_and_resets_connection() {
    let backend = MockBackend::new().with_response(
        "SELECT pg_sleep(1)",
        MockResponse::empty().delayed(Duration::from_millis(500)),
    );
    let t = TestEngine::with_config(
        backend,
        PoolConfig::new().max_connections(1).reset_on_return(false),
        EngineConfig::default(),
    )
    .await
    .unwrap();

    let slow = Statement::new("SELECT pg_sleep(1)");
    let err = t
        .engine
        .executor(&slow)
        .timeout(Duration::from_millis(20))
        .all(())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CommandTimeout(d) if d == Duration::from_millis(20)));
    assert_eq!(t.engine.pool_status().in_use, 0);
    assert_eq!(t.backend.resets(), 0);

    t.engine.scalar(&Statement::new("SELECT 1"), ()).await.unwrap();
    assert_eq!(t.backend.resets(), 1);
}

#[tokio::test]
async fn test_engine_default_options_apply() {
    let backend = MockBackend::new().with_response(
        "SELECT pg_sleep(1)",
        MockResponse::empty().delayed(Duration::from_millis(500)),
    );
    let t = TestEngine::with_config(
        backend,
        PoolConfig::new().max_connections(1),
        EngineConfig::new()
            .execution_options(ExecutionOptions::new().with_timeout(Duration::from_millis(20))),
    )
    .await
    .unwrap();

    let slow = t.engine.statement("SELECT pg_sleep(1)");
    let err = executor_for(&slow).all(()).await.unwrap_err();
    assert!(matches!(err, Error::CommandTimeout(_)));

    // A timeout on the statement itself wins over the engine default.
    let err = executor_for(&slow)
        .timeout(Duration::from_millis(30))
        .all(())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CommandTimeout(d) if d == Duration::from_millis(30)));
}

// =============================================================================
// Database facade
// =============================================================================

#[tokio::test]
async fn test_database_uses_configured_bind() {
    let t = TestEngine::new(users_backend(), 2).await.unwrap();
    let db = Database::with_bind(&t.engine);
    let count = Statement::new("SELECT count(*) FROM users");

    assert_eq!(db.scalar(&count, ()).await.unwrap(), Some(SqlValue::BigInt(2)));
    assert!(matches!(db.bind(), Some(Bind::Pool(_))));

    db.clear_bind();
    assert!(matches!(db.scalar(&count, ()).await, Err(Error::NoBind)));
    assert!(matches!(db.transaction(), Err(Error::NoBind)));

    db.set_bind(&t.engine);
    assert!(db.is_bound());
}

#[tokio::test]
async fn test_database_joins_task_connection() {
    let t = TestEngine::new(users_backend(), 2).await.unwrap();
    let db = Database::with_bind(&t.engine);
    let count = Statement::new("SELECT count(*) FROM users");

    db.transaction()
        .unwrap()
        .run(|| async {
            let current = t.engine.current_connection().unwrap();
            match db.bind() {
                Some(Bind::Connection(connection)) => assert!(connection.ptr_eq(&current)),
                other => panic!("expected the task connection, got {other:?}"),
            }
            db.scalar(&count, ()).await?;
            Ok::<_, Error>(())
        })
        .await
        .unwrap();

    assert_eq!(t.backend.begins(), 1);
    assert_eq!(t.backend.commits(), 1);
    assert_eq!(t.backend.connections_opened(), 1);
}

#[tokio::test]
async fn test_database_compile() {
    let t = TestEngine::new(MockBackend::new(), 1).await.unwrap();
    let db = Database::with_bind(&t.engine);
    let compiled = db
        .compile(
            &Statement::new("SELECT * FROM t WHERE a = :a AND b = :b AND c = :a"),
            Params::new().named("a", 1i32).named("b", 2i32),
        )
        .unwrap();
    assert_eq!(compiled.sql, "SELECT * FROM t WHERE a = $1 AND b = $2 AND c = $1");
    assert_eq!(compiled.params.len(), 2);

    let err = db
        .compile(&Statement::new("SELECT :missing"), ())
        .unwrap_err();
    assert!(err.is_statement_error());
}
