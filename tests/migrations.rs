use tourbook_api::db::MIGRATOR;
use tourbook_api::test_support::TestDatabase;

#[tokio::test]
async fn migrations_apply_and_revert_cleanly() {
    let test_db = TestDatabase::new()
        .await
        .expect("failed to provision test database");

    let pool = test_db.pool_clone();

    // TestDatabase::new already ran the migrations; revert everything.
    MIGRATOR.undo(&pool, 0).await.expect("migrations revert");

    let users_tables: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = 'public' AND table_name = 'users'",
    )
    .fetch_one(&pool)
    .await
    .expect("lookup succeeded");

    assert_eq!(users_tables, 0, "users should be dropped after revert");

    MIGRATOR.run(&pool).await.expect("migrations rerun");

    let users_tables_after: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = 'public' AND table_name = 'users'",
    )
    .fetch_one(&pool)
    .await
    .expect("lookup succeeded");

    assert_eq!(users_tables_after, 1);

    test_db.close().await.expect("failed to drop test database");
}
