//! Scheduled Backup Integration Tests
//!
//! Schedules persisted in SQLite, scheduled runs with retention, and the
//! startup reload with misfire catch-up.

mod common;

use std::time::Duration;

use chrono::{TimeZone, Utc};
use common::{scripted, stack, stack_with, wait_until_finished};
use devkeep_core::domain::{BackupRecord, ConnectionType, ScheduleStatus, TaskKind};
use devkeep_core::port::time_provider::SystemTimeProvider;
use std::sync::Arc;

/// setSchedule persists the schedule; replacing keeps run history
#[tokio::test]
async fn test_schedule_persisted_in_store() {
    let s = stack(scripted()).await;
    s.transport.add_device("ABC123", "Alice's Phone", ConnectionType::Usb);

    let schedule = s.schedules.try_set_schedule("ABC123", "30 3 * * 1-5", 7).await.unwrap();
    assert!(schedule.enabled);
    assert_eq!(schedule.max_backups, 7);

    let stored = s.records.read("ABC123").await.unwrap().schedule.unwrap();
    assert_eq!(stored, schedule);
    assert_eq!(s.schedules.next_fire_time("ABC123").await, schedule.next_run);

    s.schedules.run_scheduled_backup("ABC123").await;
    let replaced = s.schedules.try_set_schedule("ABC123", "0 4 * * *", 2).await.unwrap();
    assert_eq!(replaced.cron_expression, "0 4 * * *");
    assert_eq!(replaced.last_status, Some(ScheduleStatus::Success));
    assert!(replaced.last_run.is_some());

    let summaries = s.schedules.get_all_schedules().await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].device_name, "Alice's Phone");

    assert!(s.schedules.remove_schedule("ABC123").await);
    assert!(s.schedules.get_all_schedules().await.unwrap().is_empty());
    assert!(!s.schedules.get_schedule("ABC123").await.unwrap().unwrap().enabled);
    s.schedules.shutdown().await;
}

/// A scheduled run on an unplugged device only records the attempt
#[tokio::test]
async fn test_unavailable_device_is_recorded() {
    let s = stack(scripted()).await;
    s.schedules.try_set_schedule("ABC123", "0 2 * * *", 0).await.unwrap();

    assert_eq!(
        s.schedules.run_scheduled_backup("ABC123").await,
        ScheduleStatus::DeviceUnavailable
    );
    assert!(s.orchestrator.get_all_tasks().await.is_empty());

    let schedule = s.schedules.get_schedule("ABC123").await.unwrap().unwrap();
    assert_eq!(schedule.last_status, Some(ScheduleStatus::DeviceUnavailable));
    assert!(schedule.last_run.is_none());
    s.schedules.shutdown().await;
}

/// Scheduled runs start an incremental backup and prune beyond maxBackups
#[tokio::test]
async fn test_scheduled_run_applies_retention() {
    let s = stack(scripted()).await;
    s.transport.add_device("ABC123", "Alice's Phone", ConnectionType::Usb);

    let mut paths = Vec::new();
    s.records
        .update("ABC123", |record| {
            for (id, day) in [("2024-03-01_020000", 1), ("2024-03-02_020000", 2)] {
                let path = s.backup_root.path().join("ABC123").join(id);
                std::fs::create_dir_all(&path)?;
                paths.push(path.clone());
                record.backups.push(BackupRecord::succeeded(
                    id,
                    Utc.with_ymd_and_hms(2024, 3, day, 2, 0, 0).unwrap(),
                    true,
                    path,
                    "seed",
                ));
            }
            Ok(())
        })
        .await
        .unwrap();
    s.schedules.try_set_schedule("ABC123", "0 2 * * *", 1).await.unwrap();

    assert_eq!(s.schedules.run_scheduled_backup("ABC123").await, ScheduleStatus::Success);

    let tasks = s.orchestrator.get_all_tasks().await;
    let task = tasks.values().next().unwrap();
    assert_eq!(task.kind, TaskKind::Backup);
    assert_eq!(task.is_full, Some(false));
    wait_until_finished(&s.orchestrator, &task.id).await;

    // Oldest pruned right after the run started
    assert!(!paths[0].exists());
    assert!(paths[1].exists());
    let ids: Vec<String> = s
        .orchestrator
        .list_backups("ABC123")
        .await
        .unwrap()
        .into_iter()
        .map(|b| b.id)
        .collect();
    assert_eq!(ids.len(), 2);
    assert_eq!(ids[0], "2024-03-02_020000");
    assert_eq!(ids[1], task.backup_id);
    s.schedules.shutdown().await;
}

/// After a restart, a fire missed within the grace window runs once
#[tokio::test]
async fn test_reload_catches_up_missed_fire() {
    let first = stack(scripted()).await;
    first.schedules.try_set_schedule("ABC123", "0 2 * * *", 0).await.unwrap();
    first.schedules.shutdown().await;

    // Simulate downtime across the scheduled time
    let missed = Utc::now() - chrono::Duration::minutes(5);
    first
        .records
        .update("ABC123", |record| {
            if let Some(schedule) = record.schedule.as_mut() {
                schedule.next_run = Some(missed);
            }
            Ok(())
        })
        .await
        .unwrap();

    let restarted = stack_with(scripted(), first.records.clone(), Arc::new(SystemTimeProvider));
    restarted.transport.add_device("ABC123", "Alice's Phone", ConnectionType::Usb);

    assert_eq!(restarted.schedules.load_schedules().await.unwrap(), 1);
    let next_run = restarted.schedules.get_schedule("ABC123").await.unwrap().unwrap().next_run;
    assert!(next_run.unwrap() > Utc::now());

    let mut started = false;
    for _ in 0..100 {
        if !restarted.orchestrator.get_all_tasks().await.is_empty() {
            started = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(started, "missed fire was not caught up");

    let schedule = restarted.schedules.get_schedule("ABC123").await.unwrap().unwrap();
    assert_eq!(schedule.last_status, Some(ScheduleStatus::Success));
    restarted.schedules.shutdown().await;
}
