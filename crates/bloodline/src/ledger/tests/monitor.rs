use chrono::Duration;

use super::common::*;
use crate::ledger::{BloodType, MessageKind, StockAdjustment, StockFilter};

fn stock_o_positive(fixture: &Fixture<crate::ledger::MemoryStore>, delta: i32) {
    fixture
        .service
        .adjust_stock(
            fixture.center.id,
            StockAdjustment {
                blood_type: BloodType::OPositive,
                delta,
            },
            &admin(),
        )
        .expect("adjustment succeeds");
}

#[test]
fn critical_pair_alerts_once_until_it_changes() {
    let fixture = fixture();
    stock_o_positive(&fixture, 2);

    let first = fixture.service.run_monitor().expect("scan succeeds");
    assert_eq!(first.report.critical, 1);
    assert_eq!(first.report.alerts.len(), 1);
    assert_eq!(first.delivered, 1);

    let alert = &first.report.alerts[0];
    assert_eq!(alert.blood_type, BloodType::OPositive);
    assert_eq!(alert.quantity, 2);
    assert_eq!(alert.center_name, "Dakar Central");

    let second = fixture.service.run_monitor().expect("scan succeeds");
    assert!(second.report.alerts.is_empty());
    assert_eq!(second.report.suppressed, 1);

    let delivered = fixture.gateway.of_kind(MessageKind::CriticalStock);
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].recipient, "stock-managers");
    assert_eq!(delivered[0].payload["quantity"], "2");
    assert_eq!(delivered[0].payload["blood_type"], "O_POSITIVE");
}

#[test]
fn quantity_change_triggers_a_new_alert() {
    let fixture = fixture();
    stock_o_positive(&fixture, 3);
    fixture.service.run_monitor().expect("scan succeeds");

    stock_o_positive(&fixture, -1);
    let run = fixture.service.run_monitor().expect("scan succeeds");
    assert_eq!(run.report.alerts.len(), 1);
    assert_eq!(run.report.alerts[0].quantity, 2);
}

#[test]
fn unchanged_pair_realerts_after_cooldown() {
    let fixture = fixture();
    stock_o_positive(&fixture, 1);
    fixture.service.run_monitor().expect("scan succeeds");

    fixture.clock.advance(Duration::hours(23));
    let quiet = fixture.service.run_monitor().expect("scan succeeds");
    assert!(quiet.report.alerts.is_empty());

    fixture.clock.advance(Duration::hours(1));
    let reminder = fixture.service.run_monitor().expect("scan succeeds");
    assert_eq!(reminder.report.alerts.len(), 1);
}

#[test]
fn recovered_pair_alerts_immediately_on_next_breach() {
    let fixture = fixture();
    stock_o_positive(&fixture, 2);
    fixture.service.run_monitor().expect("scan succeeds");

    stock_o_positive(&fixture, 5);
    let recovered = fixture.service.run_monitor().expect("scan succeeds");
    assert_eq!(recovered.report.recovered, 1);
    assert_eq!(recovered.report.critical, 0);

    stock_o_positive(&fixture, -5);
    let breach = fixture.service.run_monitor().expect("scan succeeds");
    assert_eq!(breach.report.alerts.len(), 1);
    assert_eq!(breach.report.alerts[0].quantity, 2);
}

#[test]
fn failed_alert_delivery_is_retried_next_run() {
    let fixture = fixture();
    stock_o_positive(&fixture, 2);

    fixture.gateway.set_failing(true);
    let failed = fixture.service.run_monitor().expect("scan succeeds");
    assert_eq!(failed.failed, 1);
    assert_eq!(failed.delivered, 0);

    fixture.gateway.set_failing(false);
    let retried = fixture.service.run_monitor().expect("scan succeeds");
    assert_eq!(retried.delivered, 1);
    assert_eq!(fixture.gateway.of_kind(MessageKind::CriticalStock).len(), 1);
}

#[test]
fn healthy_stock_never_alerts_and_is_left_untouched() {
    let fixture = fixture();
    stock_o_positive(&fixture, 10);
    let before = fixture
        .service
        .stock_levels(&StockFilter::default())
        .expect("stock readable");

    let run = fixture.service.run_monitor().expect("scan succeeds");
    assert_eq!(run.report.critical, 0);
    assert!(run.report.alerts.is_empty());
    assert_eq!(
        fixture
            .service
            .stock_levels(&StockFilter::default())
            .expect("stock readable"),
        before
    );
}
