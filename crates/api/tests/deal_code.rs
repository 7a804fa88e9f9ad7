mod common;

use std::collections::HashSet;

use api::deal_code::allocate_deal_code;
use api::lifecycle::{create_deal_at, NewDeal};
use chrono::Utc;
use common::{actor, at, company, TestDb};
use entity::deal::{self, ForecastCategory, Stage};
use sea_orm::{ActiveValue::Set, DatabaseConnection, EntityTrait, TransactionTrait};
use uuid::Uuid;

async fn insert_imported_deal(db: &DatabaseConnection, company_id: Uuid, code: &str) {
    let now = Utc::now();
    deal::Entity::insert(deal::ActiveModel {
        id: Set(Uuid::new_v4()),
        deal_code: Set(code.to_string()),
        title: Set(format!("Imported {code}")),
        amount_cents: Set(0),
        currency: Set("USD".into()),
        stage: Set(Stage::Lead),
        probability: Set(0),
        forecast_category: Set(ForecastCategory::Pipeline),
        expected_close_date: Set(None),
        actual_close_date: Set(None),
        lost_reason: Set(None),
        lost_notes: Set(None),
        company_id: Set(company_id),
        contact_id: Set(None),
        notes: Set(None),
        assigned_user_id: Set(None),
        created_by: Set(None),
        updated_by: Set(None),
        version: Set(0),
        is_active: Set(true),
        deleted_at: Set(None),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    })
    .exec_without_returning(db)
    .await
    .unwrap();
}

#[tokio::test]
async fn first_deals_of_a_year_are_numbered_from_one() {
    let ctx = TestDb::new().await;
    let acme = company(ctx.conn(), "ACME").await;
    let when = at(2024, 3, 4, 10);

    let first = create_deal_at(ctx.conn(), NewDeal::new("Pilot", acme.id, 1_000), actor(), when)
        .await
        .unwrap();
    let second = create_deal_at(ctx.conn(), NewDeal::new("Rollout", acme.id, 2_000), actor(), when)
        .await
        .unwrap();

    assert_eq!(first.deal_code, "DEAL-2024-001");
    assert_eq!(second.deal_code, "DEAL-2024-002");
    ctx.cleanup().await;
}

#[tokio::test]
async fn sequence_restarts_each_year() {
    let ctx = TestDb::new().await;
    let acme = company(ctx.conn(), "ACME").await;

    for title in ["One", "Two"] {
        create_deal_at(ctx.conn(), NewDeal::new(title, acme.id, 0), actor(), at(2024, 12, 31, 9))
            .await
            .unwrap();
    }
    let new_year = create_deal_at(
        ctx.conn(),
        NewDeal::new("Three", acme.id, 0),
        actor(),
        at(2025, 1, 1, 9),
    )
    .await
    .unwrap();
    let late_entry = create_deal_at(
        ctx.conn(),
        NewDeal::new("Four", acme.id, 0),
        actor(),
        at(2024, 12, 31, 23),
    )
    .await
    .unwrap();

    assert_eq!(new_year.deal_code, "DEAL-2025-001");
    assert_eq!(late_entry.deal_code, "DEAL-2024-003");
    ctx.cleanup().await;
}

#[tokio::test]
async fn counter_seeds_from_existing_codes_and_widens_past_999() {
    let ctx = TestDb::new().await;
    let acme = company(ctx.conn(), "ACME").await;
    insert_imported_deal(ctx.conn(), acme.id, "DEAL-2024-998").await;
    insert_imported_deal(ctx.conn(), acme.id, "DEAL-2024-042").await;
    insert_imported_deal(ctx.conn(), acme.id, "DEAL-2023-999").await;

    let txn = ctx.conn().begin().await.unwrap();
    let next = allocate_deal_code(&txn, 2024).await.unwrap();
    let after = allocate_deal_code(&txn, 2024).await.unwrap();
    txn.commit().await.unwrap();

    assert_eq!(next, "DEAL-2024-999");
    assert_eq!(after, "DEAL-2024-1000");
    ctx.cleanup().await;
}

#[tokio::test]
async fn rolled_back_creation_does_not_consume_a_code() {
    let ctx = TestDb::new().await;
    let acme = company(ctx.conn(), "ACME").await;
    let when = at(2024, 6, 1, 12);

    let mut bad = NewDeal::new("Too hopeful", acme.id, 500);
    bad.probability = Some(80);
    let err = create_deal_at(ctx.conn(), bad, actor(), when).await.unwrap_err();
    assert_eq!(err.code(), "VALIDATION");

    let missing_company = NewDeal::new("Orphan", Uuid::new_v4(), 500);
    let err = create_deal_at(ctx.conn(), missing_company, actor(), when)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");

    let ok = create_deal_at(ctx.conn(), NewDeal::new("Real", acme.id, 500), actor(), when)
        .await
        .unwrap();
    assert_eq!(ok.deal_code, "DEAL-2024-001");
    ctx.cleanup().await;
}

/// Retries the whole creation on retryable conflicts, as API callers do.
async fn create_with_retry(db: &DatabaseConnection, title: String, company_id: Uuid) -> deal::Model {
    let when = at(2024, 8, 15, 8);
    for attempt in 0..200u64 {
        match create_deal_at(db, NewDeal::new(title.clone(), company_id, 100), actor(), when).await {
            Ok(created) => return created,
            Err(err) if err.is_retryable() => {
                tokio::time::sleep(std::time::Duration::from_millis(1 + attempt % 7)).await;
            }
            Err(err) => panic!("{title}: {err}"),
        }
    }
    panic!("{title}: still conflicting after 200 attempts");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creations_receive_distinct_codes() {
    let ctx = TestDb::pooled(8).await;
    let acme = company(ctx.conn(), "ACME").await;

    let mut handles = Vec::new();
    for n in 0..16 {
        let db = ctx.db.clone();
        let company_id = acme.id;
        handles.push(tokio::spawn(async move {
            create_with_retry(db.as_ref(), format!("Parallel {n}"), company_id).await
        }));
    }

    let mut codes = HashSet::new();
    for handle in handles {
        let created = handle.await.unwrap();
        assert!(codes.insert(created.deal_code.clone()), "duplicate {}", created.deal_code);
    }
    let expected: HashSet<String> = (1..=16).map(|n| format!("DEAL-2024-{n:03}")).collect();
    assert_eq!(codes, expected);
    ctx.cleanup().await;
}
