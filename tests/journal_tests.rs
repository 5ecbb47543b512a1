//! Integration tests for journal persistence and replay

use futures::StreamExt;

use agent_relay::journal::LogEntry;
use agent_relay::{AgentIdentity, DeliveryOutcome, MessageLog, MessageRecord, TaskId};

fn entry(payload: &str) -> LogEntry {
    LogEntry::delivery(
        AgentIdentity::from("president"),
        AgentIdentity::from("worker1"),
        TaskId::generate(),
        payload,
        DeliveryOutcome::Acknowledged,
    )
}

async fn collect(stream: futures::stream::BoxStream<'static, agent_relay::Result<MessageRecord>>) -> Vec<MessageRecord> {
    stream.map(|r| r.unwrap()).collect().await
}

#[tokio::test]
async fn sequence_numbers_are_gapless_within_a_run() {
    let dir = tempfile::tempdir().unwrap();
    let journal = MessageLog::open(dir.path().join("j.jsonl")).unwrap();

    for n in 0..20 {
        journal.append(entry(&format!("p{n}"))).unwrap();
    }

    let records = collect(journal.read_all()).await;
    assert_eq!(records.len(), 20);
    for (index, record) in records.iter().enumerate() {
        assert_eq!(record.seq, index as u64);
    }
}

#[tokio::test]
async fn read_from_resumes_exactly_after_a_full_replay() {
    let dir = tempfile::tempdir().unwrap();
    let journal = MessageLog::open(dir.path().join("j.jsonl")).unwrap();

    for n in 0..5 {
        journal.append(entry(&format!("before-{n}"))).unwrap();
    }

    let replay = collect(journal.read_all()).await;
    let resume_from = replay.last().unwrap().seq + 1;

    for n in 0..3 {
        journal.append(entry(&format!("after-{n}"))).unwrap();
    }

    // No duplicates, no omissions
    let tail = collect(journal.read_from(resume_from)).await;
    assert_eq!(tail.len(), 3);
    let payloads: Vec<&str> = tail.iter().map(|r| r.payload.as_str()).collect();
    assert_eq!(payloads, vec!["after-0", "after-1", "after-2"]);
}

#[tokio::test]
async fn sequence_numbers_survive_restart_without_reuse() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("j.jsonl");

    {
        let journal = MessageLog::open(&path).unwrap();
        for n in 0..4 {
            journal.append(entry(&format!("run1-{n}"))).unwrap();
        }
    }

    let journal = MessageLog::open(&path).unwrap();
    let record = journal.append(entry("run2-0")).unwrap();
    assert_eq!(record.seq, 4);

    let records = collect(journal.read_all()).await;
    assert_eq!(records.len(), 5);
    let seqs: Vec<u64> = records.iter().map(|r| r.seq).collect();
    assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn records_round_trip_all_fields() {
    let dir = tempfile::tempdir().unwrap();
    let journal = MessageLog::open(dir.path().join("j.jsonl")).unwrap();

    let task = TaskId::generate();
    let written = journal
        .append(LogEntry::delivery(
            AgentIdentity::from("boss1"),
            AgentIdentity::from("worker2"),
            task.clone(),
            "compile the report",
            DeliveryOutcome::Sent,
        ))
        .unwrap();

    let records = collect(journal.read_all()).await;
    let read = &records[0];
    assert_eq!(read.seq, written.seq);
    assert_eq!(read.source, AgentIdentity::from("boss1"));
    assert_eq!(read.target, AgentIdentity::from("worker2"));
    assert_eq!(read.task.as_ref(), Some(&task));
    assert_eq!(read.payload, "compile the report");
    assert_eq!(read.outcome, DeliveryOutcome::Sent);
    assert!(read.is_delivery());
}
