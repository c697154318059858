use anyhow::Result;
use resilient_core::{DeadLetterEntry, SchedulerError};
use resilient_infrastructure::DeadLetterQueue;
use serde_json::json;

#[tokio::test]
async fn test_entries_survive_reopen() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("dlq").join("dead_letters.jsonl");

    let first_id = {
        let dlq = DeadLetterQueue::open(&path, 3).await?;
        let first = dlq.push("email", json!({"to": "a@b"}), "503").await?;
        dlq.push("sms", json!({"to": "+1"}), "429").await?;
        first.id
    };

    let content = std::fs::read_to_string(&path)?;
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 2);
    let parsed: serde_json::Value = serde_json::from_str(lines[0])?;
    for field in ["id", "kind", "payload", "error", "failedAt", "retryCount", "maxRetries"] {
        assert!(parsed.get(field).is_some(), "missing field {field}");
    }

    let reopened = DeadLetterQueue::open(&path, 3).await?;
    assert_eq!(reopened.len().await, 2);
    let first = reopened.get(&first_id).await.unwrap();
    assert_eq!(first.kind, "email");
    assert_eq!(first.max_retries, 3);
    Ok(())
}

#[tokio::test]
async fn test_replay_bookkeeping_is_durable() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("dead_letters.jsonl");

    let dlq = DeadLetterQueue::open(&path, 1).await?;
    let entry = dlq.push("job", json!(null), "timeout").await?;
    dlq.begin_replay(&entry.id).await?;
    dlq.record_replay_failure(&entry.id, "still timing out").await?;

    let reopened = DeadLetterQueue::open(&path, 1).await?;
    let stored = reopened.get(&entry.id).await.unwrap();
    assert_eq!(stored.retry_count, 1);
    assert_eq!(stored.error, "still timing out");

    let err = reopened.begin_replay(&entry.id).await.unwrap_err();
    assert!(matches!(err, SchedulerError::RetriesExhausted { .. }));

    assert!(reopened.remove(&entry.id).await?);
    assert!(DeadLetterQueue::open(&path, 1).await?.is_empty().await);
    Ok(())
}

#[tokio::test]
async fn test_torn_line_is_skipped() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("dead_letters.jsonl");
    let entry = DeadLetterEntry::new("job", json!({"k": 1}), "503", 3);
    let mut content = serde_json::to_string(&entry)?;
    content.push_str("\n{\"id\": \"trunc");
    std::fs::write(&path, content)?;

    let dlq = DeadLetterQueue::open(&path, 3).await?;
    assert_eq!(dlq.list().await, vec![entry]);
    Ok(())
}

#[tokio::test]
async fn test_failed_rewrite_leaves_entries_untouched() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("dead_letters.jsonl");

    let dlq = DeadLetterQueue::open(&path, 3).await?;
    let entry = dlq.push("job", json!({"k": 1}), "503").await?;

    // 临时文件路径被目录占用，重写必然失败
    let blocker = path.with_extension("tmp");
    std::fs::create_dir(&blocker)?;

    assert!(dlq.begin_replay(&entry.id).await.is_err());
    assert!(dlq.record_replay_failure(&entry.id, "other").await.is_err());
    assert!(dlq.remove(&entry.id).await.is_err());
    assert_eq!(dlq.list().await, vec![entry.clone()]);
    assert_eq!(
        DeadLetterQueue::open(&path, 3).await?.list().await,
        vec![entry.clone()]
    );

    std::fs::remove_dir(&blocker)?;
    let claimed = dlq.begin_replay(&entry.id).await?;
    assert_eq!(claimed.retry_count, 1);
    assert_eq!(dlq.get(&entry.id).await.unwrap().retry_count, 1);
    Ok(())
}
