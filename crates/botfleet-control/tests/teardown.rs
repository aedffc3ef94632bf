#![allow(missing_docs, clippy::unwrap_used)]
//! Teardown pipeline tests against in-memory control planes.

mod common;

use botfleet_control::cloud::{CloudError, FunctionCall};
use botfleet_control::{
    DeployOutput, DeploymentId, DeploymentStatus, DeploymentStore, OperationOutcome, UserId,
};
use common::{bot_config, TestFleet, API_ID};

const USER: UserId = UserId::new(7);

async fn deployed(fleet: &TestFleet, bot_name: &str) -> DeployOutput {
    match fleet.manager.deploy(USER, &bot_config(bot_name)).await {
        OperationOutcome::Completed(output) => output,
        OperationOutcome::Failed { error } => panic!("deploy failed: {error}"),
    }
}

fn deletes(fleet: &TestFleet) -> usize {
    fleet
        .functions
        .calls()
        .iter()
        .filter(|c| matches!(c, FunctionCall::Delete(_)))
        .count()
}

async fn status_of(fleet: &TestFleet, id: &DeploymentId) -> DeploymentStatus {
    fleet.store.get(id).await.unwrap().unwrap().status
}

#[tokio::test]
async fn teardown_removes_function_and_permission() {
    let fleet = TestFleet::new();
    let output = deployed(&fleet, "support").await;

    let outcome = fleet.manager.teardown(USER, &output.deployment_id).await;

    let OperationOutcome::Completed(done) = outcome else {
        panic!("teardown failed");
    };
    assert_eq!(done.message, "Teardown successful");
    assert!(!fleet.functions.exists("user-app-7-support"));
    assert!(!fleet
        .functions
        .has_permission("user-app-7-support", "apigateway-7-support"));
    assert_eq!(
        status_of(&fleet, &output.deployment_id).await,
        DeploymentStatus::Inactive
    );
}

#[tokio::test]
async fn teardown_keeps_shared_proxy_route() {
    let fleet = TestFleet::new();
    let support = deployed(&fleet, "support").await;
    deployed(&fleet, "sales").await;

    assert!(fleet
        .manager
        .teardown(USER, &support.deployment_id)
        .await
        .is_completed());

    let proxy = fleet.proxy_resource();
    assert!(fleet.routing.has_method(API_ID, &proxy, "ANY"));
    assert!(fleet.functions.exists("user-app-7-sales"));
}

#[tokio::test]
async fn teardown_removes_bot_specific_route() {
    let fleet = TestFleet::new();
    let output = deployed(&fleet, "support").await;
    let resource = fleet.routing.add_resource(API_ID, "/user/7/support/chat");
    fleet
        .routing
        .add_method(API_ID, &resource, "ANY", "arn:test:user-app-7-support");

    assert!(fleet
        .manager
        .teardown(USER, &output.deployment_id)
        .await
        .is_completed());

    assert!(!fleet.routing.has_method(API_ID, &resource, "ANY"));
}

#[tokio::test]
async fn teardown_after_external_delete_completes() {
    let fleet = TestFleet::new();
    let output = deployed(&fleet, "support").await;
    fleet.functions.remove_externally("user-app-7-support");

    let outcome = fleet.manager.teardown(USER, &output.deployment_id).await;

    let OperationOutcome::Completed(done) = outcome else {
        panic!("teardown failed");
    };
    assert_eq!(done.message, "Teardown successful, nothing left to remove");
    assert_eq!(
        status_of(&fleet, &output.deployment_id).await,
        DeploymentStatus::Inactive
    );
}

#[tokio::test]
async fn second_teardown_is_a_noop() {
    let fleet = TestFleet::new();
    let output = deployed(&fleet, "support").await;

    assert!(fleet
        .manager
        .teardown(USER, &output.deployment_id)
        .await
        .is_completed());
    let calls_after_first = fleet.functions.calls().len();
    let outcome = fleet.manager.teardown(USER, &output.deployment_id).await;

    let OperationOutcome::Completed(done) = outcome else {
        panic!("second teardown failed");
    };
    assert_eq!(done.message, "Teardown successful, nothing left to remove");
    assert_eq!(fleet.functions.calls().len(), calls_after_first);
    assert_eq!(deletes(&fleet), 1);
}

#[tokio::test]
async fn stale_teardown_leaves_redeployed_bot_running() {
    let fleet = TestFleet::new();
    let first = deployed(&fleet, "support").await;
    assert!(fleet
        .manager
        .teardown(USER, &first.deployment_id)
        .await
        .is_completed());
    let second = deployed(&fleet, "support").await;

    let outcome = fleet.manager.teardown(USER, &first.deployment_id).await;

    assert!(outcome.is_completed(), "{outcome:?}");
    assert!(fleet.functions.exists("user-app-7-support"));
    assert!(fleet
        .functions
        .has_permission("user-app-7-support", "apigateway-7-support"));
    assert_eq!(deletes(&fleet), 1);
    assert_eq!(
        status_of(&fleet, &second.deployment_id).await,
        DeploymentStatus::Active
    );
}

#[tokio::test]
async fn superseded_failed_record_does_not_remove_live_function() {
    let fleet = TestFleet::new();
    let first = deployed(&fleet, "support").await;
    fleet.functions.fail_next(
        "delete_function",
        CloudError::Terminal("access denied".to_owned()),
    );
    assert!(fleet
        .manager
        .teardown(USER, &first.deployment_id)
        .await
        .error()
        .is_some());
    let second = deployed(&fleet, "support").await;
    assert_ne!(first.deployment_id, second.deployment_id);

    let outcome = fleet.manager.teardown(USER, &first.deployment_id).await;

    let OperationOutcome::Completed(done) = outcome else {
        panic!("teardown failed");
    };
    assert!(done.message.contains(second.deployment_id.as_str()), "{}", done.message);
    assert!(fleet.functions.exists("user-app-7-support"));
    assert!(fleet
        .functions
        .has_permission("user-app-7-support", "apigateway-7-support"));
    assert_eq!(
        status_of(&fleet, &first.deployment_id).await,
        DeploymentStatus::Inactive
    );
    assert_eq!(
        status_of(&fleet, &second.deployment_id).await,
        DeploymentStatus::Active
    );
}

#[tokio::test]
async fn teardown_of_unknown_deployment_fails() {
    let fleet = TestFleet::new();

    let outcome = fleet
        .manager
        .teardown(USER, &DeploymentId::new("missing"))
        .await;

    assert!(outcome.error().unwrap().contains("deployment not found"));
    assert!(fleet.functions.calls().is_empty());
}

#[tokio::test]
async fn teardown_by_another_user_fails() {
    let fleet = TestFleet::new();
    let output = deployed(&fleet, "support").await;

    let outcome = fleet
        .manager
        .teardown(UserId::new(8), &output.deployment_id)
        .await;

    assert!(outcome.error().unwrap().contains("deployment not found"));
    assert!(fleet.functions.exists("user-app-7-support"));
    assert_eq!(
        status_of(&fleet, &output.deployment_id).await,
        DeploymentStatus::Active
    );
}

#[tokio::test]
async fn failed_teardown_is_recorded_and_can_be_rerun() {
    let fleet = TestFleet::new();
    let output = deployed(&fleet, "support").await;
    fleet.functions.fail_next(
        "delete_function",
        CloudError::Terminal("access denied".to_owned()),
    );

    let outcome = fleet.manager.teardown(USER, &output.deployment_id).await;

    assert!(outcome.error().unwrap().contains("access denied"));
    let record = fleet.store.get(&output.deployment_id).await.unwrap().unwrap();
    assert_eq!(record.status, DeploymentStatus::Failed);
    assert!(record.error.unwrap().contains("access denied"));
    assert!(fleet.functions.exists("user-app-7-support"));

    assert!(fleet
        .manager
        .teardown(USER, &output.deployment_id)
        .await
        .is_completed());
    assert!(!fleet.functions.exists("user-app-7-support"));
    assert_eq!(
        status_of(&fleet, &output.deployment_id).await,
        DeploymentStatus::Inactive
    );
}

#[tokio::test]
async fn redeploy_after_teardown_creates_new_record() {
    let fleet = TestFleet::new();
    let first = deployed(&fleet, "support").await;
    assert!(fleet
        .manager
        .teardown(USER, &first.deployment_id)
        .await
        .is_completed());

    let second = deployed(&fleet, "support").await;

    assert_ne!(first.deployment_id, second.deployment_id);
    assert!(fleet.functions.exists("user-app-7-support"));
    assert_eq!(
        status_of(&fleet, &second.deployment_id).await,
        DeploymentStatus::Active
    );
}
