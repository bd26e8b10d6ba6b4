//! Integration tests for the provisioning flow
//!
//! Runs complete provisioning requests against the in-memory control plane,
//! covering allocation, re-entry, side effects, teardown and the
//! concurrent-allocation race.

use std::collections::HashSet;
use std::sync::Arc;
use subnet_provisioner::control_plane::RouteRecord;
use subnet_provisioner::{
    AddressBlock, AssociationState, BlockAssociation, CidrPartitioner, Error, InMemoryConfig,
    InMemoryControlPlane, Label, MemoryAllocationStore, Operation, ProvisionRequest,
    ProvisionerConfig, ResourceAttribute, ResourceDescription, SubnetProvisioner,
    DEFAULT_INDEX_LABEL_KEY,
};
use tokio::sync::{Barrier, Mutex};
use tokio_util::sync::CancellationToken;

fn block(s: &str) -> AddressBlock {
    s.parse().unwrap()
}

fn control_plane() -> Arc<InMemoryControlPlane> {
    let cp = Arc::new(InMemoryControlPlane::new());
    cp.add_parent_space("vpc-1", block("2001:db8::/32"));
    cp
}

fn index_label(cp: &InMemoryControlPlane, resource_id: &str) -> Option<String> {
    cp.resource(resource_id).and_then(|r| {
        r.labels
            .into_iter()
            .find(|l| l.key == DEFAULT_INDEX_LABEL_KEY)
            .map(|l| l.value)
    })
}

// ============================================================================
// Allocation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_sequential_provisioning_fills_quarters() {
    let cp = control_plane();
    for id in ["subnet-a", "subnet-b", "subnet-c", "subnet-d"] {
        cp.add_resource(ResourceDescription::new(id, "vpc-1"));
    }
    let provisioner = SubnetProvisioner::new(cp.clone(), ProvisionerConfig::default());
    let cancel = CancellationToken::new();

    let mut blocks = Vec::new();
    for (expected, id) in ["subnet-a", "subnet-b", "subnet-c", "subnet-d"].iter().enumerate() {
        let outcome = provisioner
            .provision(&ProvisionRequest::new(*id, 34), &cancel)
            .await
            .unwrap();
        assert_eq!(outcome.index as usize, expected);
        assert_eq!(outcome.parent.id, "vpc-1");
        assert_eq!(index_label(&cp, id), Some(expected.to_string()));
        blocks.push(outcome.block.to_string());
    }

    assert_eq!(
        blocks,
        vec![
            "2001:db8::/34",
            "2001:db8:4000::/34",
            "2001:db8:8000::/34",
            "2001:db8:c000::/34",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_parent_exhausted() {
    let cp = control_plane();
    for (index, b) in ["2001:db8::/33", "2001:db8:8000::/33"].iter().enumerate() {
        cp.add_allocated_resource(
            &format!("subnet-{}", index),
            "vpc-1",
            block(b),
            DEFAULT_INDEX_LABEL_KEY,
            index as u32,
        );
    }
    cp.add_resource(ResourceDescription::new("subnet-late", "vpc-1"));
    let provisioner = SubnetProvisioner::new(cp.clone(), ProvisionerConfig::default());

    let result = provisioner
        .provision(&ProvisionRequest::new("subnet-late", 33), &CancellationToken::new())
        .await;
    assert!(matches!(result, Err(Error::IndexOutOfRange { index: 2, .. })));
    assert_eq!(cp.call_count(Operation::SetLabel), 0);
}

#[tokio::test(start_paused = true)]
async fn test_freed_index_is_reused() {
    let cp = control_plane();
    cp.add_allocated_resource("subnet-a", "vpc-1", block("2001:db8::/64"), DEFAULT_INDEX_LABEL_KEY, 0);
    cp.add_allocated_resource("subnet-c", "vpc-1", block("2001:db8:0:2::/64"), DEFAULT_INDEX_LABEL_KEY, 2);
    cp.add_resource(ResourceDescription::new("subnet-new", "vpc-1"));
    let provisioner = SubnetProvisioner::new(cp.clone(), ProvisionerConfig::default());

    let outcome = provisioner
        .provision(&ProvisionRequest::new("subnet-new", 64), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.index, 1);
    assert_eq!(outcome.block, block("2001:db8:0:1::/64"));
}

#[tokio::test(start_paused = true)]
async fn test_siblings_without_block_claim_nothing() {
    let cp = control_plane();
    let mut idle = ResourceDescription::new("subnet-idle", "vpc-1");
    idle.labels.push(Label::new(DEFAULT_INDEX_LABEL_KEY, "0"));
    cp.add_resource(idle);
    cp.add_resource(ResourceDescription::new("subnet-new", "vpc-1"));
    let provisioner = SubnetProvisioner::new(cp.clone(), ProvisionerConfig::default());

    let plan = provisioner.plan("subnet-new", 48).await.unwrap();
    assert_eq!(plan.index, 0);
}

#[tokio::test(start_paused = true)]
async fn test_paginated_siblings_are_drained() {
    let cp = Arc::new(InMemoryControlPlane::with_config(InMemoryConfig {
        page_size: 2,
        ..Default::default()
    }));
    cp.add_parent_space("vpc-1", block("2001:db8::/56"));
    let partitioner = CidrPartitioner::new(block("2001:db8::/56"), 64).unwrap();
    for index in 0..5u32 {
        let b = partitioner.nth(u128::from(index)).unwrap();
        cp.add_allocated_resource(&format!("subnet-{}", index), "vpc-1", b, DEFAULT_INDEX_LABEL_KEY, index);
    }
    cp.add_resource(ResourceDescription::new("subnet-x", "vpc-1"));
    let provisioner = SubnetProvisioner::new(cp.clone(), ProvisionerConfig::default());

    let plan = provisioner.plan("subnet-x", 64).await.unwrap();
    assert_eq!(plan.index, 5);
    assert_eq!(plan.sibling_count, 6);
    assert_eq!(plan.block, block("2001:db8:0:5::/64"));
    assert_eq!(cp.call_count(Operation::ListSiblingResources), 3);
}

#[tokio::test(start_paused = true)]
async fn test_memory_store_backend() {
    let cp = control_plane();
    cp.add_resource(ResourceDescription::new("subnet-a", "vpc-1"));
    cp.add_resource(ResourceDescription::new("subnet-b", "vpc-1"));
    let store = Arc::new(MemoryAllocationStore::new());
    let provisioner = SubnetProvisioner::with_store(cp.clone(), store.clone(), ProvisionerConfig::default());
    let cancel = CancellationToken::new();

    let a = provisioner.provision(&ProvisionRequest::new("subnet-a", 40), &cancel).await.unwrap();
    let b = provisioner.provision(&ProvisionRequest::new("subnet-b", 40), &cancel).await.unwrap();

    assert_eq!((a.index, b.index), (0, 1));
    assert_eq!(store.len(), 2);
    assert_eq!(cp.call_count(Operation::SetLabel), 0);
}

// ============================================================================
// Prerequisite and bookkeeping failures
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_parent_without_ipv6_block() {
    let cp = Arc::new(InMemoryControlPlane::new());
    cp.add_empty_parent_space("vpc-empty");
    cp.add_resource(ResourceDescription::new("subnet-a", "vpc-empty"));
    let provisioner = SubnetProvisioner::new(cp.clone(), ProvisionerConfig::default());

    let result = provisioner
        .provision(&ProvisionRequest::new("subnet-a", 64), &CancellationToken::new())
        .await;
    assert!(matches!(result, Err(Error::ParentAddressSpace(_))));
    assert_eq!(cp.call_count(Operation::RequestAssociation), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_resource() {
    let cp = control_plane();
    let provisioner = SubnetProvisioner::new(cp, ProvisionerConfig::default());

    let result = provisioner.plan("subnet-missing", 64).await;
    assert!(matches!(result, Err(Error::ResourceNotFound(id)) if id == "subnet-missing"));
}

#[tokio::test(start_paused = true)]
async fn test_sibling_with_block_but_no_tag() {
    let cp = control_plane();
    let mut untagged = ResourceDescription::new("subnet-untagged", "vpc-1");
    untagged.associations = Some(vec![BlockAssociation::new(
        "assoc-manual",
        block("2001:db8::/64"),
        AssociationState::Associated,
    )]);
    cp.add_resource(untagged);
    cp.add_resource(ResourceDescription::new("subnet-new", "vpc-1"));
    let provisioner = SubnetProvisioner::new(cp.clone(), ProvisionerConfig::default());

    let result = provisioner
        .provision(&ProvisionRequest::new("subnet-new", 64), &CancellationToken::new())
        .await;
    assert!(matches!(result, Err(Error::MissingIndexTag(id)) if id == "subnet-untagged"));
    assert_eq!(cp.call_count(Operation::SetLabel), 0);
}

#[tokio::test(start_paused = true)]
async fn test_sibling_with_duplicate_tags() {
    let cp = control_plane();
    cp.add_allocated_resource("subnet-dup", "vpc-1", block("2001:db8::/64"), DEFAULT_INDEX_LABEL_KEY, 0);
    let mut dup = cp.resource("subnet-dup").unwrap();
    dup.labels.push(Label::new(DEFAULT_INDEX_LABEL_KEY, "0"));
    cp.add_resource(dup);
    cp.add_resource(ResourceDescription::new("subnet-new", "vpc-1"));
    let provisioner = SubnetProvisioner::new(cp.clone(), ProvisionerConfig::default());

    let result = provisioner.plan("subnet-new", 64).await;
    assert!(matches!(result, Err(Error::MultipleMatchingTags { count: 2, .. })));
}

// ============================================================================
// Re-entry and side effects
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_reentry_returns_same_allocation() {
    let cp = control_plane();
    cp.add_allocated_resource("subnet-a", "vpc-1", block("2001:db8::/48"), DEFAULT_INDEX_LABEL_KEY, 0);
    cp.add_resource(ResourceDescription::new("subnet-b", "vpc-1"));
    let provisioner = SubnetProvisioner::new(cp.clone(), ProvisionerConfig::default());
    let cancel = CancellationToken::new();
    let request = ProvisionRequest::new("subnet-b", 48);

    let first = provisioner.provision(&request, &cancel).await.unwrap();
    let second = provisioner.provision(&request, &cancel).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.index, 1);
    assert_eq!(cp.call_count(Operation::RequestAssociation), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_request_is_completed_by_reentry() {
    let cp = control_plane();
    cp.add_resource(ResourceDescription::new("subnet-a", "vpc-1"));
    let provisioner = SubnetProvisioner::new(cp.clone(), ProvisionerConfig::default());
    let cancel = CancellationToken::new();
    let request = ProvisionRequest::new("subnet-a", 48);

    cp.inject_transient_failures(Operation::RequestAssociation, 1);
    let result = provisioner.provision(&request, &cancel).await;
    assert!(matches!(result, Err(Error::Transport { .. })));
    // The index stays recorded, nothing is rolled back
    assert_eq!(index_label(&cp, "subnet-a"), Some("0".to_string()));

    let outcome = provisioner.provision(&request, &cancel).await.unwrap();
    assert_eq!(outcome.index, 0);
    assert_eq!(outcome.block, block("2001:db8::/48"));
}

#[tokio::test(start_paused = true)]
async fn test_side_effects_after_activation() {
    let cp = control_plane();
    cp.add_resource(ResourceDescription::new("subnet-a", "vpc-1"));
    let provisioner = SubnetProvisioner::new(cp.clone(), ProvisionerConfig::default());

    let request = ProvisionRequest::new("subnet-a", 64)
        .with_default_route("rtb-1", "eigw-1")
        .with_ipv6_assignment(true);
    let outcome = provisioner
        .provision(&request, &CancellationToken::new())
        .await
        .unwrap();

    let held = cp.resource("subnet-a").unwrap();
    assert_eq!(held.held_association().unwrap().state, AssociationState::Associated);
    assert_eq!(held.held_association().unwrap().association_id, outcome.association_id);

    assert_eq!(
        cp.routes(),
        vec![RouteRecord {
            route_table_id: "rtb-1".to_string(),
            destination: block("::/0"),
            gateway_id: "eigw-1".to_string(),
        }]
    );
    let updates = cp.attribute_updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].attribute, ResourceAttribute::AssignIpv6AddressOnCreation);
    assert!(updates[0].value);
}

#[tokio::test(start_paused = true)]
async fn test_reentry_does_not_repeat_side_effects() {
    let cp = control_plane();
    cp.add_resource(ResourceDescription::new("subnet-a", "vpc-1"));
    let provisioner = SubnetProvisioner::new(cp.clone(), ProvisionerConfig::default());
    let cancel = CancellationToken::new();
    let request = ProvisionRequest::new("subnet-a", 64)
        .with_default_route("rtb-1", "eigw-1")
        .with_ipv6_assignment(true);

    let first = provisioner.provision(&request, &cancel).await.unwrap();
    let second = provisioner.provision(&request, &cancel).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(cp.call_count(Operation::RequestAssociation), 1);
    assert_eq!(cp.routes().len(), 1);
    assert_eq!(cp.attribute_updates().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_side_effects_follow_reentry_before_activation() {
    let cp = control_plane();
    cp.add_resource(ResourceDescription::new("subnet-a", "vpc-1"));
    let provisioner = SubnetProvisioner::new(cp.clone(), ProvisionerConfig::default());
    let request = ProvisionRequest::new("subnet-a", 64).with_default_route("rtb-1", "eigw-1");

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    let result = provisioner.provision(&request, &cancelled).await;
    assert!(matches!(result, Err(Error::Cancelled(_))));

    // The association is still associating, so this call sees it activate
    provisioner
        .provision(&request, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(cp.call_count(Operation::RequestAssociation), 1);
    assert_eq!(cp.routes().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_route_needs_both_ids() {
    let cp = control_plane();
    cp.add_resource(ResourceDescription::new("subnet-a", "vpc-1"));
    let provisioner = SubnetProvisioner::new(cp.clone(), ProvisionerConfig::default());

    let mut request = ProvisionRequest::new("subnet-a", 64);
    request.route_table_id = Some("rtb-1".to_string());
    provisioner
        .provision(&request, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(cp.call_count(Operation::RequestRouteCreation), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_before_activation() {
    let cp = control_plane();
    cp.add_resource(ResourceDescription::new("subnet-a", "vpc-1"));
    let provisioner = SubnetProvisioner::new(cp.clone(), ProvisionerConfig::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let request = ProvisionRequest::new("subnet-a", 64).with_default_route("rtb-1", "eigw-1");
    let result = provisioner.provision(&request, &cancel).await;

    assert!(matches!(result, Err(Error::Cancelled(_))));
    assert!(cp.routes().is_empty());
    // The association request itself is not rolled back
    assert!(cp.resource("subnet-a").unwrap().has_block());
}

// ============================================================================
// Teardown
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_release_removes_record() {
    let cp = control_plane();
    cp.add_resource(ResourceDescription::new("subnet-a", "vpc-1"));
    let provisioner = SubnetProvisioner::new(cp.clone(), ProvisionerConfig::default());

    provisioner
        .provision(&ProvisionRequest::new("subnet-a", 64), &CancellationToken::new())
        .await
        .unwrap();
    provisioner.release("subnet-a").await;

    assert_eq!(index_label(&cp, "subnet-a"), None);
}

#[tokio::test]
async fn test_release_is_silent() {
    let cp = control_plane();
    cp.add_resource(ResourceDescription::new("subnet-bare", "vpc-1"));
    let provisioner = SubnetProvisioner::new(cp.clone(), ProvisionerConfig::default());

    provisioner.release("subnet-bare").await;
    provisioner.release("subnet-gone").await;

    assert_eq!(cp.call_count(Operation::DeleteLabels), 0);
}

// ============================================================================
// Concurrency
// ============================================================================

/// Two requests that observe the same sibling snapshot pick the same index.
/// The control plane refuses the second overlapping association.
#[tokio::test(start_paused = true)]
async fn test_concurrent_requests_race_for_same_index() {
    let cp = control_plane();
    cp.add_resource(ResourceDescription::new("subnet-a", "vpc-1"));
    cp.add_resource(ResourceDescription::new("subnet-b", "vpc-1"));
    cp.set_snapshot_barrier(Arc::new(Barrier::new(2)));
    let provisioner = SubnetProvisioner::new(cp.clone(), ProvisionerConfig::default());
    let cancel = CancellationToken::new();

    let request_a = ProvisionRequest::new("subnet-a", 64);
    let request_b = ProvisionRequest::new("subnet-b", 64);
    let (a, b) = tokio::join!(
        provisioner.provision(&request_a, &cancel),
        provisioner.provision(&request_b, &cancel),
    );

    // Both recorded index 0
    assert_eq!(index_label(&cp, "subnet-a"), Some("0".to_string()));
    assert_eq!(index_label(&cp, "subnet-b"), Some("0".to_string()));

    let (won, lost) = match (a, b) {
        (Ok(won), Err(lost)) => (won, lost),
        (Err(lost), Ok(won)) => (won, lost),
        other => panic!("expected exactly one winner, got {:?}", other),
    };
    assert_eq!(won.index, 0);
    assert!(matches!(lost, Error::Rejected { .. }));

    // Re-running the loser moves it to the next free index
    cp.clear_snapshot_barrier();
    let loser = if won.resource_id == "subnet-a" { request_b } else { request_a };
    let retried = provisioner.provision(&loser, &cancel).await.unwrap();
    assert_eq!(retried.index, 1);
    assert_eq!(index_label(&cp, &loser.resource_id), Some("1".to_string()));
}

/// Serializing requests around provision keeps indices distinct
#[tokio::test(start_paused = true)]
async fn test_serialized_requests_get_distinct_indices() {
    let cp = control_plane();
    let ids: Vec<String> = (0..4).map(|i| format!("subnet-{}", i)).collect();
    for id in &ids {
        cp.add_resource(ResourceDescription::new(id.clone(), "vpc-1"));
    }
    let provisioner = Arc::new(SubnetProvisioner::new(cp.clone(), ProvisionerConfig::default()));
    let lock = Arc::new(Mutex::new(()));

    let mut handles = Vec::new();
    for id in ids {
        let provisioner = provisioner.clone();
        let lock = lock.clone();
        handles.push(tokio::spawn(async move {
            let _guard = lock.lock().await;
            provisioner
                .provision(&ProvisionRequest::new(id, 64), &CancellationToken::new())
                .await
        }));
    }

    let mut indices = HashSet::new();
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        indices.insert(outcome.index);
    }
    assert_eq!(indices, (0..4).collect());
}
