mod common;

use common::{actor, data, error_code, execute, CrmSchema, TestDb};
use serde_json::json;

const CREATE_COMPANY: &str = r#"
    mutation ($input: NewCompanyInput!) {
        crm { createCompany(input: $input) { id name } }
    }
"#;

const CREATE_DEAL: &str = r#"
    mutation ($input: NewDealInput!) {
        crm {
            createDeal(input: $input) {
                id dealCode stage probability forecastCategory version isClosed
            }
        }
    }
"#;

const TRANSITION: &str = r#"
    mutation ($id: ID!, $input: TransitionDealInput!) {
        crm {
            transitionDeal(id: $id, input: $input) {
                stage probability forecastCategory weightedAmountCents isClosed
                actualCloseDate lostReason version
            }
        }
    }
"#;

async fn seeded_deal(schema: &CrmSchema, amount_cents: i64) -> (String, String) {
    let who = Some(actor());
    let company = data(
        execute(schema, CREATE_COMPANY, json!({ "input": { "name": "ACME" } }), who).await,
    );
    let company_id = company["crm"]["createCompany"]["id"].as_str().unwrap().to_string();
    let deal = data(
        execute(
            schema,
            CREATE_DEAL,
            json!({ "input": { "title": "Pilot", "companyId": company_id, "amountCents": amount_cents } }),
            who,
        )
        .await,
    );
    let created = &deal["crm"]["createDeal"];
    (
        created["id"].as_str().unwrap().to_string(),
        created["dealCode"].as_str().unwrap().to_string(),
    )
}

#[tokio::test]
async fn mutations_require_an_actor() {
    let ctx = TestDb::new().await;
    let schema = ctx.schema();
    let resp = execute(&schema, CREATE_COMPANY, json!({ "input": { "name": "ACME" } }), None).await;
    assert_eq!(error_code(&resp).as_deref(), Some("UNAUTHENTICATED"));
    ctx.cleanup().await;
}

#[tokio::test]
async fn deal_moves_through_the_pipeline_over_graphql() {
    let ctx = TestDb::new().await;
    let schema = ctx.schema();
    let (deal_id, deal_code) = seeded_deal(&schema, 1_000).await;
    assert!(deal_code.starts_with("DEAL-"));

    let moved = data(
        execute(
            &schema,
            TRANSITION,
            json!({ "id": deal_id, "input": { "stage": "proposal", "note": "sent deck" } }),
            Some(actor()),
        )
        .await,
    );
    let deal = &moved["crm"]["transitionDeal"];
    assert_eq!(deal["stage"], "PROPOSAL");
    assert_eq!(deal["probability"], 60);
    assert_eq!(deal["forecastCategory"], "BEST_CASE");
    assert_eq!(deal["weightedAmountCents"], 600);
    assert_eq!(deal["isClosed"], false);

    let lost = data(
        execute(
            &schema,
            TRANSITION,
            json!({
                "id": deal_id,
                "input": { "stage": "CLOSED_LOST", "lostReason": "PRICE", "lostNotes": "too pricey" }
            }),
            Some(actor()),
        )
        .await,
    );
    let deal = &lost["crm"]["transitionDeal"];
    assert_eq!(deal["stage"], "CLOSED_LOST");
    assert_eq!(deal["lostReason"], "PRICE");
    assert_eq!(deal["isClosed"], true);
    assert!(deal["actualCloseDate"].is_string());
    assert_eq!(deal["version"], 2);

    let history = data(
        execute(
            &schema,
            r#"query ($id: ID!) { crm { dealStageHistory(dealId: $id) { fromStage toStage note } } }"#,
            json!({ "id": deal_id }),
            None,
        )
        .await,
    );
    let rows = history["crm"]["dealStageHistory"].as_array().unwrap();
    assert_eq!(rows.len(), 2);
    let mut targets: Vec<_> = rows.iter().map(|r| r["toStage"].as_str().unwrap()).collect();
    targets.sort_unstable();
    assert_eq!(targets, vec!["CLOSED_LOST", "PROPOSAL"]);
    ctx.cleanup().await;
}

#[tokio::test]
async fn errors_carry_stable_codes() {
    let ctx = TestDb::new().await;
    let schema = ctx.schema();
    let (deal_id, _) = seeded_deal(&schema, 5_000).await;

    let unknown_stage = execute(
        &schema,
        TRANSITION,
        json!({ "id": deal_id, "input": { "stage": "won" } }),
        Some(actor()),
    )
    .await;
    assert_eq!(error_code(&unknown_stage).as_deref(), Some("INVALID_TRANSITION"));

    let out_of_band = execute(
        &schema,
        TRANSITION,
        json!({ "id": deal_id, "input": { "stage": "qualified", "probability": 80 } }),
        Some(actor()),
    )
    .await;
    assert_eq!(error_code(&out_of_band).as_deref(), Some("VALIDATION"));

    let missing_reason = execute(
        &schema,
        TRANSITION,
        json!({ "id": deal_id, "input": { "stage": "closed_lost" } }),
        Some(actor()),
    )
    .await;
    assert_eq!(error_code(&missing_reason).as_deref(), Some("VALIDATION"));

    let stale = execute(
        &schema,
        TRANSITION,
        json!({ "id": deal_id, "input": { "stage": "qualified", "expectedVersion": 7 } }),
        Some(actor()),
    )
    .await;
    assert_eq!(error_code(&stale).as_deref(), Some("CONFLICT"));
    let retryable = stale.errors[0]
        .extensions
        .as_ref()
        .and_then(|ext| ext.get("retryable"))
        .cloned();
    assert_eq!(retryable, Some(async_graphql::Value::from(true)));

    data(
        execute(
            &schema,
            TRANSITION,
            json!({ "id": deal_id, "input": { "stage": "closed_won" } }),
            Some(actor()),
        )
        .await,
    );
    let terminal = execute(
        &schema,
        TRANSITION,
        json!({ "id": deal_id, "input": { "stage": "lead" } }),
        Some(actor()),
    )
    .await;
    assert_eq!(error_code(&terminal).as_deref(), Some("INVALID_TRANSITION"));

    let missing = execute(
        &schema,
        r#"query ($id: ID!) { crm { deal(id: $id) { id } } }"#,
        json!({ "id": uuid::Uuid::new_v4().to_string() }),
        None,
    )
    .await;
    assert_eq!(error_code(&missing).as_deref(), Some("NOT_FOUND"));
    ctx.cleanup().await;
}

#[tokio::test]
async fn archived_deals_are_hidden_from_listing_but_keep_history() {
    let ctx = TestDb::new().await;
    let schema = ctx.schema();
    let (deal_id, _) = seeded_deal(&schema, 5_000).await;
    data(
        execute(
            &schema,
            TRANSITION,
            json!({ "id": deal_id, "input": { "stage": "qualified" } }),
            Some(actor()),
        )
        .await,
    );
    data(
        execute(
            &schema,
            r#"mutation ($id: ID!) { crm { archiveDeal(id: $id) { isActive } } }"#,
            json!({ "id": deal_id }),
            Some(actor()),
        )
        .await,
    );

    let listed = data(
        execute(&schema, r#"{ crm { deals { id } } }"#, json!({}), None).await,
    );
    assert_eq!(listed["crm"]["deals"].as_array().unwrap().len(), 0);
    let all = data(
        execute(&schema, r#"{ crm { deals(includeArchived: true) { id isActive } } }"#, json!({}), None)
            .await,
    );
    assert_eq!(all["crm"]["deals"][0]["isActive"], false);

    let history = data(
        execute(
            &schema,
            r#"query ($id: ID!) { crm { dealStageHistory(dealId: $id) { toStage } } }"#,
            json!({ "id": deal_id }),
            None,
        )
        .await,
    );
    assert_eq!(history["crm"]["dealStageHistory"][0]["toStage"], "QUALIFIED");

    let blocked = execute(
        &schema,
        TRANSITION,
        json!({ "id": deal_id, "input": { "stage": "proposal" } }),
        Some(actor()),
    )
    .await;
    assert_eq!(error_code(&blocked).as_deref(), Some("NOT_FOUND"));
    ctx.cleanup().await;
}

#[tokio::test]
async fn reports_and_tasks_are_exposed() {
    let ctx = TestDb::new().await;
    let schema = ctx.schema();
    let (deal_id, _) = seeded_deal(&schema, 2_000).await;

    let task = data(
        execute(
            &schema,
            r#"mutation ($input: NewTaskInput!) {
                crm { createTask(input: $input) { id status relatedKind relatedId isOverdue } }
            }"#,
            json!({ "input": { "title": "Call back", "dealId": deal_id, "priority": "HIGH" } }),
            Some(actor()),
        )
        .await,
    );
    let created = &task["crm"]["createTask"];
    assert_eq!(created["status"], "PENDING");
    assert_eq!(created["relatedKind"], "DEAL");
    assert_eq!(created["relatedId"], deal_id.as_str());
    assert_eq!(created["isOverdue"], false);

    let both = execute(
        &schema,
        r#"mutation ($input: NewTaskInput!) { crm { createTask(input: $input) { id } } }"#,
        json!({ "input": { "title": "Ambiguous", "dealId": deal_id, "companyId": deal_id } }),
        Some(actor()),
    )
    .await;
    assert_eq!(error_code(&both).as_deref(), Some("VALIDATION"));

    let summary = data(
        execute(
            &schema,
            r#"{ crm { pipelineSummary { stage label count amountCents weightedAmountCents } } }"#,
            json!({}),
            None,
        )
        .await,
    );
    let rows = summary["crm"]["pipelineSummary"].as_array().unwrap();
    assert_eq!(rows.len(), 7);
    assert_eq!(rows[0]["stage"], "LEAD");
    assert_eq!(rows[0]["label"], "Lead");
    assert_eq!(rows[0]["count"], 1);
    assert_eq!(rows[0]["amountCents"], 2_000);

    let forecast = data(
        execute(&schema, r#"{ crm { forecast { days count } } }"#, json!({}), None).await,
    );
    let days: Vec<_> = forecast["crm"]["forecast"]
        .as_array()
        .unwrap()
        .iter()
        .map(|w| w["days"].as_i64().unwrap())
        .collect();
    assert_eq!(days, vec![30, 60, 90]);
    ctx.cleanup().await;
}

#[tokio::test]
async fn task_views_and_company_stats_are_exposed() {
    let ctx = TestDb::new().await;
    let schema = ctx.schema();
    let me = actor();
    let company = data(
        execute(&schema, CREATE_COMPANY, json!({ "input": { "name": "Globex" } }), Some(me)).await,
    );
    let company_id = company["crm"]["createCompany"]["id"].as_str().unwrap().to_string();
    data(
        execute(
            &schema,
            CREATE_DEAL,
            json!({ "input": { "title": "Pilot", "companyId": company_id, "amountCents": 5_000 } }),
            Some(me),
        )
        .await,
    );

    let task = data(
        execute(
            &schema,
            r#"mutation ($input: NewTaskInput!) {
                crm { createTask(input: $input) { id daysOverdue } }
            }"#,
            json!({ "input": {
                "title": "Send proposal",
                "companyId": company_id,
                "assignedUserId": me.user_id.to_string(),
            } }),
            Some(me),
        )
        .await,
    );
    let task_id = task["crm"]["createTask"]["id"].as_str().unwrap().to_string();
    assert_eq!(task["crm"]["createTask"]["daysOverdue"], 0);

    let unauthenticated = execute(&schema, r#"{ crm { myTasks { id } } }"#, json!({}), None).await;
    assert_eq!(error_code(&unauthenticated).as_deref(), Some("UNAUTHENTICATED"));

    let mine = data(execute(&schema, r#"{ crm { myTasks { id } } }"#, json!({}), Some(me)).await);
    assert_eq!(mine["crm"]["myTasks"][0]["id"], task_id.as_str());

    let someone_else = uuid::Uuid::new_v4().to_string();
    let moved = data(
        execute(
            &schema,
            r#"mutation ($id: ID!, $to: ID!) {
                crm { reassignTask(id: $id, assignedUserId: $to) { assignedUserId } }
            }"#,
            json!({ "id": task_id, "to": someone_else }),
            Some(me),
        )
        .await,
    );
    assert_eq!(moved["crm"]["reassignTask"]["assignedUserId"], someone_else.as_str());
    let mine = data(execute(&schema, r#"{ crm { myTasks { id } } }"#, json!({}), Some(me)).await);
    assert_eq!(mine["crm"]["myTasks"], json!([]));

    let views = data(
        execute(
            &schema,
            r#"{ crm { overdueTasks { id } upcomingTasks { id } } }"#,
            json!({}),
            None,
        )
        .await,
    );
    assert_eq!(views["crm"]["overdueTasks"], json!([]));
    assert_eq!(views["crm"]["upcomingTasks"], json!([]));

    let stats = data(
        execute(
            &schema,
            r#"query ($id: ID!) {
                crm { companyStats(companyId: $id) { deals openDeals amountCents contacts } }
            }"#,
            json!({ "id": company_id }),
            None,
        )
        .await,
    );
    assert_eq!(
        stats["crm"]["companyStats"],
        json!({ "deals": 1, "openDeals": 1, "amountCents": 5_000, "contacts": 0 })
    );
    ctx.cleanup().await;
}
