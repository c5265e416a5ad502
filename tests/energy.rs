//! Energy transfer and counter bookkeeping through complete actions

mod common;

use chrono::Utc;
use serde_json::Value;
use tokio_test::{assert_err, assert_ok};

use common::World;
use mies::db::schemas::{ActionState, BuildingDoc, Content};
use mies::dispatch::TaskOutcome;
use mies::life::{CycleOutcome, Settled};
use mies::stats::{BuildingState, FloorStats};
use mies::MiesError;

fn article(address: &str) -> BuildingDoc {
    BuildingDoc::new(address, "0").with_payload("article-text", Content::new())
}

/// Start an action on `building` and resolve it with `outcome`
async fn start_and_resolve(
    world: &World,
    building: &BuildingDoc,
    resident: &mies::db::schemas::ResidentDoc,
    outcome: TaskOutcome,
) -> BuildingDoc {
    world
        .coordinator
        .start_processing(building, resident, "extract-article-concepts", Utc::now())
        .await
        .unwrap();
    let task = world.dispatcher.last_submitted().unwrap();
    world.dispatcher.resolve(&task.handle, outcome);
    world.building(building).await
}

#[tokio::test]
async fn full_energy_is_transferred_on_success() {
    let world = World::new();
    let building = world.register(article("a-1").with_energy(100.0)).await;
    let resident = world.add_resident("0").await;

    let building = start_and_resolve(&world, &building, &resident, TaskOutcome::succeeded()).await;
    let (index, entry) = building.latest_action().unwrap();
    let report = world
        .coordinator
        .finish_processing(&building, &resident, index, entry, &TaskOutcome::succeeded(), Utc::now())
        .await
        .unwrap();

    assert_eq!(report.energy_gained, 100.0);
    assert_eq!(report.building_energy, 0.0);
    assert!(report.processed);

    let stored = world.building(&building).await;
    assert_eq!(stored.energy, Some(0.0));
    assert!(stored.processed);

    let after = world.resident(&resident).await;
    assert_eq!(after.energy, 100.0);
    assert!(!after.processing);

    // Conservation: what the resident gained the building lost
    assert_eq!(after.energy - resident.energy, 100.0 - stored.energy.unwrap());

    let summary = world.stats.summary("0").await.unwrap();
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.being_processed, 0);
    assert_eq!(summary.unprocessed, 0);

    let smells = world.smell.events.lock().unwrap().clone();
    assert_eq!(smells, vec![("a-1".to_string(), 0.0)]);
}

#[tokio::test]
async fn unset_energy_uses_the_baseline() {
    let world = World::new();
    let building = world.register(article("a-1")).await;
    assert_eq!(building.energy, None);
    let resident = world.add_resident("0").await;

    let building = start_and_resolve(&world, &building, &resident, TaskOutcome::succeeded()).await;
    let (index, entry) = building.latest_action().unwrap();
    let report = world
        .coordinator
        .finish_processing(&building, &resident, index, entry, &TaskOutcome::succeeded(), Utc::now())
        .await
        .unwrap();

    assert_eq!(report.energy_gained, 50.0);
    assert_eq!(world.resident(&resident).await.energy, 50.0);
    assert_eq!(world.building(&building).await.energy, Some(0.0));
}

#[tokio::test]
async fn explicit_zero_energy_is_not_the_baseline() {
    let world = World::new();
    let building = world.register(article("a-1").with_energy(0.0)).await;
    let resident = world.add_resident("0").await;

    let building = start_and_resolve(&world, &building, &resident, TaskOutcome::succeeded()).await;
    let (index, entry) = building.latest_action().unwrap();
    let report = world
        .coordinator
        .finish_processing(&building, &resident, index, entry, &TaskOutcome::succeeded(), Utc::now())
        .await
        .unwrap();

    assert_eq!(report.energy_gained, 0.0);
    // No energy moved, so the building is not processed
    assert!(!report.processed);
    assert_eq!(world.stats.count("0", BuildingState::Unprocessed).await.unwrap(), 1);
}

#[tokio::test]
async fn partial_success_moves_partial_energy() {
    let world = World::new();
    let building = world.register(article("a-1").with_energy(80.0)).await;
    let resident = world.add_resident("0").await;

    let outcome = TaskOutcome::succeeded().with_success_level(0.25);
    let building = start_and_resolve(&world, &building, &resident, outcome.clone()).await;
    let (index, entry) = building.latest_action().unwrap();
    let report = world
        .coordinator
        .finish_processing(&building, &resident, index, entry, &outcome, Utc::now())
        .await
        .unwrap();

    assert_eq!(report.energy_gained, 20.0);
    assert_eq!(report.building_energy, 60.0);
    assert!(report.processed);
}

#[tokio::test]
async fn counters_sum_to_one_throughout() {
    let world = World::new();
    let building = world.register(article("a-1").with_energy(10.0)).await;
    let resident = world.add_resident("0").await;

    let summary = world.stats.summary("0").await.unwrap();
    assert_eq!((summary.unprocessed, summary.total()), (1, 1));

    let building = start_and_resolve(&world, &building, &resident, TaskOutcome::succeeded()).await;
    let summary = world.stats.summary("0").await.unwrap();
    assert_eq!((summary.being_processed, summary.total()), (1, 1));

    let (index, entry) = building.latest_action().unwrap();
    world
        .coordinator
        .finish_processing(&building, &resident, index, entry, &TaskOutcome::succeeded(), Utc::now())
        .await
        .unwrap();
    let summary = world.stats.summary("0").await.unwrap();
    assert_eq!((summary.processed, summary.total()), (1, 1));
    assert_eq!(summary.being_processed, 0);
}

#[tokio::test]
async fn finishing_twice_is_refused() {
    let world = World::new();
    let building = world.register(article("a-1").with_energy(100.0)).await;
    let resident = world.add_resident("0").await;

    let building = start_and_resolve(&world, &building, &resident, TaskOutcome::succeeded()).await;
    let (index, entry) = building.latest_action().unwrap();
    let entry = entry.clone();

    world
        .coordinator
        .finish_processing(&building, &resident, index, &entry, &TaskOutcome::succeeded(), Utc::now())
        .await
        .unwrap();
    let err = assert_err!(
        world
            .coordinator
            .finish_processing(&building, &resident, index, &entry, &TaskOutcome::succeeded(), Utc::now())
            .await
    );
    assert!(matches!(err, MiesError::InvalidTransition(_)));

    // Nothing was applied a second time
    assert_eq!(world.resident(&resident).await.energy, 100.0);
    let summary = world.stats.summary("0").await.unwrap();
    assert_eq!(summary.being_processed, 0);
    assert_eq!(summary.processed, 1);
    assert_eq!(
        world.building(&building).await.actions[index].status,
        ActionState::Completed
    );
}

#[tokio::test]
async fn broken_cache_does_not_block_durable_write() {
    let world = World::with_broken_cache();
    let building = world.register(article("a-1").with_energy(100.0)).await;
    let resident = world.add_resident("0").await;

    let building = start_and_resolve(&world, &building, &resident, TaskOutcome::succeeded()).await;
    let (index, entry) = building.latest_action().unwrap();
    assert_ok!(
        world
            .coordinator
            .finish_processing(&building, &resident, index, entry, &TaskOutcome::succeeded(), Utc::now())
            .await
    );
    let stored = world.building(&building).await;
    assert_eq!(stored.energy, Some(0.0));
    assert!(stored.processed);
}

#[tokio::test]
async fn mirror_follows_the_durable_write() {
    let world = World::new();
    let building = world.register(article("a-1").with_energy(100.0)).await;
    let resident = world.add_resident("0").await;

    let building = start_and_resolve(&world, &building, &resident, TaskOutcome::succeeded()).await;
    let (index, entry) = building.latest_action().unwrap();
    world
        .coordinator
        .finish_processing(&building, &resident, index, entry, &TaskOutcome::succeeded(), Utc::now())
        .await
        .unwrap();

    let entry = world.cache.get_entry("a-1").unwrap();
    let cached: Value = serde_json::from_slice(&entry.data).unwrap();
    assert_eq!(cached["energy"], 0.0);
    assert_eq!(cached["processed"], true);
}

#[tokio::test]
async fn interrupted_completion_is_settled_on_the_next_event() {
    let world = World::new();
    let building = world.register(article("a-1").with_energy(100.0)).await;
    let resident = world.add_resident("0").await;
    let now = Utc::now();

    world.life.handle_life_event(&resident.id, now).await.unwrap();
    let task = world.dispatcher.last_submitted().unwrap();
    world.dispatcher.resolve(&task.handle, TaskOutcome::succeeded());

    // The building commits, crediting the resident fails
    world.flaky_residents.fail_next_credit();
    let err = assert_err!(world.life.handle_life_event(&resident.id, now).await);
    assert!(matches!(err, MiesError::Database(_)));

    let stored = world.building(&building).await;
    let (index, entry) = stored.latest_action().unwrap();
    assert_eq!(entry.status, ActionState::Completed);
    assert_eq!(entry.energy_gained, Some(100.0));
    assert_eq!(stored.energy, Some(0.0));
    assert!(stored.processed);
    assert!(world.resident(&resident).await.processing);
    assert_eq!(world.stats.count("0", BuildingState::BeingProcessed).await.unwrap(), 1);

    // A second finish on the same entry is still refused
    let pending = building_before_close(&stored, index);
    let err = assert_err!(
        world
            .coordinator
            .finish_processing(&pending, &resident, index, &pending.actions[index], &TaskOutcome::succeeded(), now)
            .await
    );
    assert!(matches!(err, MiesError::InvalidTransition(_)));

    // The next life event picks up where the failed one stopped
    let outcome = world.life.handle_life_event(&resident.id, now).await.unwrap();
    match outcome {
        CycleOutcome::Moved { settled, .. } => assert_eq!(
            settled,
            Settled::Completed {
                energy_gained: 100.0,
                processed: true,
            }
        ),
        other => panic!("unexpected outcome {:?}", other),
    }

    let after = world.resident(&resident).await;
    assert_eq!(after.energy, 100.0);
    assert!(!after.processing);
    assert!(!world.dispatcher.is_tracked(&task.handle));

    let summary = world.stats.summary("0").await.unwrap();
    assert_eq!(
        (summary.processed, summary.being_processed, summary.unprocessed),
        (1, 0, 0)
    );

    // Settled once: a further event does not credit again
    world.life.handle_life_event(&resident.id, now).await.unwrap();
    assert_eq!(world.resident(&resident).await.energy, 100.0);
}

/// The record as it looked while the entry at `index` was still open
fn building_before_close(building: &BuildingDoc, index: usize) -> BuildingDoc {
    let mut before = building.clone();
    before.actions[index].status = ActionState::Pending;
    before.actions[index].ended_at = None;
    before.actions[index].energy_gained = None;
    before.actions[index].result = None;
    before
}
