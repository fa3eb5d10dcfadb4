mod common;

use bastionflow_cloud::error::{CloudError, ProviderError};
use bastionflow_cloud::ledger::{self, LedgerStatus, ResourceKind};
use bastionflow_cloud::rollback::{
    InteractiveOutcome, LedgerDisposition, RollbackEngine, RollbackState, RollbackStatus,
};
use bastionflow_cloud::store::{FileLedgerStore, LedgerStore, MemoryLedgerStore};
use common::{FakeProvider, ScriptedPrompt, ledger_with};
use tokio_test::assert_ok;

fn in_use(id: &str) -> ProviderError {
    ProviderError::api("DependencyViolation", format!("{} has dependencies", id))
}

/// Deletes happen in exact reverse creation order
#[tokio::test]
async fn test_reverse_order() {
    let provider = FakeProvider::new();
    let store = MemoryLedgerStore::new();
    let ledger = ledger_with(
        "demo",
        &[
            (ResourceKind::Vpc, "vpc-1"),
            (ResourceKind::Subnet, "subnet-1"),
            (ResourceKind::Subnet, "subnet-2"),
            (ResourceKind::SecurityGroup, "sg-1"),
            (ResourceKind::DbSubnetGroup, "demo-db-subnet-group"),
        ],
    );

    let report = RollbackEngine::new(&provider, &store).rollback(&ledger).await;

    assert_eq!(
        provider.teardowns(),
        vec![
            "delete DB subnet group demo-db-subnet-group",
            "delete security group sg-1",
            "delete subnet subnet-2",
            "delete subnet subnet-1",
            "delete VPC vpc-1",
        ]
    );
    let ids: Vec<&str> = report.entries.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["demo-db-subnet-group", "sg-1", "subnet-2", "subnet-1", "vpc-1"]);
    assert!(report.is_success());
    assert_eq!(report.ledger_state, LedgerDisposition::Untracked);
}

/// Rolling back resources that are already gone is a success
#[tokio::test]
async fn test_idempotent_rollback() {
    let provider = FakeProvider::new();
    let store = MemoryLedgerStore::new();
    let ledger = ledger_with(
        "demo",
        &[
            (ResourceKind::Vpc, "vpc-1"),
            (ResourceKind::InternetGateway, "igw-1"),
            (ResourceKind::Ec2Instance, "i-1"),
            (ResourceKind::RdsInstance, "bastiondb-instance"),
        ],
    );
    for id in ["vpc-1", "igw-1", "i-1", "bastiondb-instance"] {
        provider.mark_absent(id);
    }

    let report = RollbackEngine::new(&provider, &store).rollback(&ledger).await;

    assert!(report.is_success());
    assert_eq!(report.failed_count(), 0);
    assert!(
        report
            .entries
            .iter()
            .all(|e| e.status == RollbackStatus::AlreadyAbsent)
    );
    // No waiting on something that is already gone
    assert!(!provider.teardowns().iter().any(|t| t.starts_with("wait")));
}

/// One failure in the middle does not stop the earlier resources
#[tokio::test]
async fn test_partial_failure_continues() {
    let provider = FakeProvider::new();
    let store = MemoryLedgerStore::new();
    let ledger = ledger_with(
        "demo",
        &[
            (ResourceKind::Vpc, "vpc-1"),
            (ResourceKind::Subnet, "subnet-1"),
            (ResourceKind::SecurityGroup, "sg-1"),
            (ResourceKind::Subnet, "subnet-2"),
        ],
    );
    provider.fail_teardown("delete security group sg-1", in_use("sg-1"));

    let report = RollbackEngine::new(&provider, &store).rollback(&ledger).await;

    assert_eq!(report.failed_count(), 1);
    assert_eq!(report.state(), RollbackState::PartiallyRolledBack);
    let failed: Vec<&str> = report.failed().map(|e| e.id.as_str()).collect();
    assert_eq!(failed, vec!["sg-1"]);
    assert_eq!(provider.teardowns().len(), 4);
    assert_eq!(report.entries[3].id, "vpc-1");
    assert_eq!(report.entries[3].status, RollbackStatus::Deleted);
}

/// Scenario A: three records, rollback by name removes the stored ledger
#[tokio::test]
async fn test_rollback_by_name_removes_ledger() {
    let provider = FakeProvider::new();
    let dir = tempfile::tempdir().unwrap();
    let store = FileLedgerStore::new(dir.path());
    let ledger = ledger_with(
        "demo",
        &[
            (ResourceKind::Vpc, "vpc-1"),
            (ResourceKind::InternetGateway, "igw-1"),
            (ResourceKind::Subnet, "subnet-1"),
        ],
    );
    ledger::persist(&store, &ledger).await.unwrap();
    assert!(dir.path().join("demo_rollback.json").exists());

    let report = assert_ok!(
        RollbackEngine::new(&provider, &store)
            .rollback_by_name("demo")
            .await
    );

    assert_eq!(
        provider.teardowns(),
        vec![
            "delete subnet subnet-1",
            "detach internet gateway igw-1 from vpc-1",
            "delete internet gateway igw-1",
            "delete VPC vpc-1",
        ]
    );
    assert!(report.is_success());
    assert_eq!(report.ledger_state, LedgerDisposition::Removed);
    assert!(!dir.path().join("demo_rollback.json").exists());
}

/// Scenario C: no stored ledger means NotFound and no deletes
#[tokio::test]
async fn test_rollback_by_name_missing() {
    let provider = FakeProvider::new();
    let dir = tempfile::tempdir().unwrap();
    let store = FileLedgerStore::new(dir.path());

    let result = RollbackEngine::new(&provider, &store)
        .rollback_by_name("demo")
        .await;

    assert!(matches!(result, Err(CloudError::NotFound(_))));
    assert!(provider.teardowns().is_empty());
}

/// Scenario D: record 2 fails, the ledger is kept and marked
#[tokio::test]
async fn test_partial_rollback_retains_ledger() {
    let provider = FakeProvider::new();
    let store = MemoryLedgerStore::new();
    let ledger = ledger_with(
        "demo",
        &[
            (ResourceKind::Vpc, "vpc-1"),
            (ResourceKind::Subnet, "subnet-1"),
            (ResourceKind::SecurityGroup, "sg-1"),
            (ResourceKind::Ec2Instance, "i-1"),
        ],
    );
    ledger::persist(&store, &ledger).await.unwrap();
    provider.fail_teardown("delete subnet subnet-1", in_use("subnet-1"));

    let report = RollbackEngine::new(&provider, &store)
        .rollback_by_name("demo")
        .await
        .unwrap();

    let statuses: Vec<(&str, bool)> = report
        .entries
        .iter()
        .map(|e| (e.id.as_str(), e.status.is_failed()))
        .collect();
    assert_eq!(
        statuses,
        vec![("i-1", false), ("sg-1", false), ("subnet-1", true), ("vpc-1", false)]
    );
    assert_eq!(report.state(), RollbackState::PartiallyRolledBack);
    assert_eq!(report.ledger_state, LedgerDisposition::Retained);

    let stored = ledger::load(&store, "demo").await.unwrap();
    assert_eq!(stored.status, LedgerStatus::PartiallyRolledBack);
    assert_eq!(stored.len(), 4);
}

/// Retrying a partial rollback finishes the job
#[tokio::test]
async fn test_retry_after_partial_rollback() {
    let provider = FakeProvider::new();
    let store = MemoryLedgerStore::new();
    let ledger = ledger_with(
        "demo",
        &[(ResourceKind::Vpc, "vpc-1"), (ResourceKind::Subnet, "subnet-1")],
    );
    ledger::persist(&store, &ledger).await.unwrap();
    provider.fail_teardown("delete VPC vpc-1", in_use("vpc-1"));

    let engine = RollbackEngine::new(&provider, &store);
    let first = engine.rollback_by_name("demo").await.unwrap();
    assert!(!first.is_success());
    assert!(store.contains("demo"));

    let retry_provider = FakeProvider::new();
    retry_provider.mark_absent("subnet-1");
    let second = RollbackEngine::new(&retry_provider, &store)
        .rollback_by_name("demo")
        .await
        .unwrap();

    assert!(second.is_success());
    assert_eq!(second.entries[0].status, RollbackStatus::AlreadyAbsent);
    assert_eq!(second.entries[1].status, RollbackStatus::Deleted);
    assert!(!store.contains("demo"));
}

/// A failed detach is a warning; the gateway delete still runs
#[tokio::test]
async fn test_detach_failure_still_deletes_gateway() {
    let provider = FakeProvider::new();
    let store = MemoryLedgerStore::new();
    let ledger = ledger_with("demo", &[(ResourceKind::InternetGateway, "igw-1")]);
    provider.fail_teardown(
        "detach internet gateway igw-1 from vpc-1",
        ProviderError::api("RequestLimitExceeded", "throttled"),
    );

    let report = RollbackEngine::new(&provider, &store).rollback(&ledger).await;

    assert!(report.is_success());
    assert_eq!(report.entries[0].status, RollbackStatus::Deleted);
    assert_eq!(report.entries[0].warnings.len(), 1);
    assert_eq!(
        provider.teardowns(),
        vec![
            "detach internet gateway igw-1 from vpc-1",
            "delete internet gateway igw-1"
        ]
    );
}

/// A wait that times out fails the entry
#[tokio::test]
async fn test_settle_timeout_fails_entry() {
    let provider = FakeProvider::new();
    let store = MemoryLedgerStore::new();
    let ledger = ledger_with(
        "demo",
        &[(ResourceKind::Subnet, "subnet-1"), (ResourceKind::Ec2Instance, "i-1")],
    );
    provider.fail_teardown(
        "wait for EC2 instance i-1 to terminate",
        ProviderError::Timeout("i-1 terminated".into()),
    );

    let report = RollbackEngine::new(&provider, &store).rollback(&ledger).await;

    assert!(report.entries[0].status.is_failed());
    assert_eq!(report.entries[1].status, RollbackStatus::Deleted);
}

/// Key pair rollback removes the local private key
#[tokio::test]
async fn test_key_pair_removes_key_file() {
    let provider = FakeProvider::new();
    let store = MemoryLedgerStore::new();
    let dir = tempfile::tempdir().unwrap();
    let key_file = dir.path().join("demo-key.pem");
    std::fs::write(&key_file, "secret").unwrap();

    let mut ledger = ledger::ProvisioningLedger::new("demo");
    let mut metadata = ledger::Metadata::new();
    metadata.insert(
        "key_file".to_string(),
        serde_json::json!(key_file.display().to_string()),
    );
    ledger.append(ResourceKind::KeyPair, "demo-key", metadata);

    let report = RollbackEngine::new(&provider, &store).rollback(&ledger).await;

    assert!(report.is_success());
    assert!(report.entries[0].warnings.is_empty());
    assert!(!key_file.exists());
}

#[tokio::test]
async fn test_interactive_nothing_to_roll_back() {
    let provider = FakeProvider::new();
    let store = MemoryLedgerStore::new();
    let mut prompt = ScriptedPrompt::answering("1");

    let outcome = RollbackEngine::new(&provider, &store)
        .interactive_rollback(&mut prompt)
        .await
        .unwrap();

    assert!(matches!(outcome, InteractiveOutcome::NothingToRollBack));
    assert!(prompt.shown.is_empty());
}

#[tokio::test]
async fn test_interactive_cancel_and_end_of_input() {
    let provider = FakeProvider::new();
    let store = MemoryLedgerStore::new();
    ledger::persist(&store, &ledger_with("demo", &[(ResourceKind::Vpc, "vpc-1")]))
        .await
        .unwrap();
    let engine = RollbackEngine::new(&provider, &store);

    for mut prompt in [ScriptedPrompt::answering("q"), ScriptedPrompt::answering(""), ScriptedPrompt::end_of_input()] {
        let outcome = engine.interactive_rollback(&mut prompt).await.unwrap();
        assert!(matches!(outcome, InteractiveOutcome::Cancelled));
        assert_eq!(prompt.shown, vec!["demo"]);
    }

    assert!(provider.teardowns().is_empty());
    assert!(store.contains("demo"));
}

#[tokio::test]
async fn test_interactive_invalid_selection() {
    let provider = FakeProvider::new();
    let store = MemoryLedgerStore::new();
    ledger::persist(&store, &ledger_with("demo", &[(ResourceKind::Vpc, "vpc-1")]))
        .await
        .unwrap();

    let mut prompt = ScriptedPrompt::answering("7");
    let result = RollbackEngine::new(&provider, &store)
        .interactive_rollback(&mut prompt)
        .await;

    assert!(matches!(result, Err(CloudError::InvalidSelection(_))));
    assert!(provider.teardowns().is_empty());
}

#[tokio::test]
async fn test_interactive_single_selection() {
    let provider = FakeProvider::new();
    let store = MemoryLedgerStore::new();
    ledger::persist(&store, &ledger_with("alpha", &[(ResourceKind::Vpc, "vpc-a")]))
        .await
        .unwrap();
    ledger::persist(&store, &ledger_with("beta", &[(ResourceKind::Vpc, "vpc-b")]))
        .await
        .unwrap();

    let mut prompt = ScriptedPrompt::answering("2");
    let outcome = RollbackEngine::new(&provider, &store)
        .interactive_rollback(&mut prompt)
        .await
        .unwrap();

    let InteractiveOutcome::Completed(results) = outcome else {
        panic!("expected a completed rollback");
    };
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].key, "beta");
    assert_eq!(provider.teardowns(), vec!["delete VPC vpc-b"]);
    assert!(store.contains("alpha"));
    assert!(!store.contains("beta"));
}

/// "all" rolls back every ledger; a corrupt one is reported on its own
#[tokio::test]
async fn test_interactive_all_with_corrupt_ledger() {
    let provider = FakeProvider::new();
    let store = MemoryLedgerStore::new();
    ledger::persist(&store, &ledger_with("alpha", &[(ResourceKind::Vpc, "vpc-a")]))
        .await
        .unwrap();
    store.write("broken", "{ not json").await.unwrap();
    ledger::persist(&store, &ledger_with("gamma", &[(ResourceKind::Vpc, "vpc-g")]))
        .await
        .unwrap();

    let mut prompt = ScriptedPrompt::answering("all");
    let outcome = RollbackEngine::new(&provider, &store)
        .interactive_rollback(&mut prompt)
        .await
        .unwrap();

    let InteractiveOutcome::Completed(results) = outcome else {
        panic!("expected a completed rollback");
    };
    let keys: Vec<&str> = results.iter().map(|r| r.key.as_str()).collect();
    assert_eq!(keys, vec!["alpha", "broken", "gamma"]);
    assert!(results[0].outcome.is_ok());
    assert!(results[1].outcome.is_err());
    assert!(results[2].outcome.is_ok());
    assert_eq!(
        provider.teardowns(),
        vec!["delete VPC vpc-a", "delete VPC vpc-g"]
    );
    assert!(store.contains("broken"));
}
