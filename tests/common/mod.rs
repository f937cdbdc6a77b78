#![allow(dead_code)]

use billrunner::application::pipeline::Pipeline;
use billrunner::domain::actor::Actor;
use billrunner::domain::request::{PaymentMethod, Request, RequestDraft};
use billrunner::domain::task::{Task, TaskKind, TaskStatus};
use billrunner::infrastructure::clock::ManualClock;
use billrunner::infrastructure::in_memory::InMemoryLedgerStore;
use billrunner::infrastructure::notifier::RecordingNotifier;
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use std::fs::File;
use std::io::Error;
use std::path::Path;
use std::sync::Arc;

pub const CUSTOMER: u32 = 10;
pub const RIDER: u32 = 7;
pub const ADMIN: u32 = 1;

pub struct TestPipeline {
    pub pipeline: Pipeline,
    pub clock: ManualClock,
    pub notifier: RecordingNotifier,
}

/// In-memory pipeline on a fixed clock (2024-05-01 09:00 UTC).
pub fn pipeline() -> TestPipeline {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap());
    let notifier = RecordingNotifier::new();
    let pipeline = Pipeline::builder(Arc::new(InMemoryLedgerStore::new()))
        .clock(Arc::new(clock.clone()))
        .notifier(Arc::new(notifier.clone()))
        .build();
    TestPipeline {
        pipeline,
        clock,
        notifier,
    }
}

pub fn draft(bill: Decimal, fee: Decimal) -> RequestDraft {
    RequestDraft {
        biller_name: "Metro Water".to_string(),
        biller_category: "utilities".to_string(),
        account_reference: "MW-0042".to_string(),
        bill_amount: bill,
        service_fee: fee,
        payment_method: PaymentMethod::Cash,
        delivery_address: "12 Rizal St".to_string(),
        contact_number: "0917-000-0000".to_string(),
        zone: Some("north".to_string()),
        due_date: None,
        special_instructions: None,
    }
}

/// Opens a request and creates its first task.
pub async fn posted_task(pipeline: &Pipeline, bill: Decimal, fee: Decimal, kind: TaskKind) -> (Request, Task) {
    let customer = Actor::customer(CUSTOMER);
    let request = pipeline.requests.open(customer, draft(bill, fee)).await.unwrap();
    let task = pipeline
        .dispatcher
        .create_task(customer, request.id(), kind)
        .await
        .unwrap();
    (request, task)
}

/// Walks a fresh request through to a completed task done by [`RIDER`].
pub async fn completed_task(pipeline: &Pipeline, bill: Decimal, fee: Decimal) -> (Request, Task) {
    let rider = Actor::rider(RIDER);
    let (request, task) = posted_task(pipeline, bill, fee, TaskKind::CollectPayment).await;
    pipeline.dispatcher.accept(rider, task.id()).await.unwrap();
    pipeline
        .dispatcher
        .advance(rider, task.id(), TaskStatus::InProgress)
        .await
        .unwrap();
    let task = pipeline
        .dispatcher
        .advance(rider, task.id(), TaskStatus::Completed)
        .await
        .unwrap();
    let request = pipeline.requests.get(request.id()).await.unwrap();
    (request, task)
}

/// Writes a script of `count` complete request lifecycles for one rider.
pub fn generate_script(path: &Path, count: u32) -> Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);

    wtr.write_record(["op", "actor", "role", "target", "amount", "fee", "method", "detail"])?;
    for id in 1..=count {
        let id = id.to_string();
        wtr.write_record(["open", "10", "customer", "", "1000.00", "50.00", "cash", "Metro Water"])?;
        wtr.write_record(["create_task", "10", "customer", &id, "", "", "", "collect_payment"])?;
        wtr.write_record(["accept", "7", "rider", &id, "", "", "", ""])?;
        wtr.write_record(["advance", "7", "rider", &id, "", "", "", "in_progress"])?;
        wtr.write_record(["advance", "7", "rider", &id, "", "", "", "completed"])?;
        wtr.write_record(["record_payment", "7", "rider", &id, "1050.00", "", "cash", ""])?;
        wtr.write_record(["complete_payment", "1", "admin", &id, "", "", "", ""])?;
    }
    wtr.flush()?;
    Ok(())
}
