//! Tests for job status transitions
//!
//! The agent never mutates job state directly; these transitions are the ones
//! the job store is allowed to perform on its behalf.

use crawler_domain::job::{JobStatus, JobType};

#[test]
fn test_inactive_transitions() {
    let inactive = JobStatus::Inactive;

    assert!(inactive.can_transition_to(JobStatus::Active));

    assert!(!inactive.can_transition_to(JobStatus::Seeding));
    assert!(!inactive.can_transition_to(JobStatus::Aborting));
    assert!(!inactive.can_transition_to(JobStatus::Inactive));
}

#[test]
fn test_active_transitions() {
    let active = JobStatus::Active;

    assert!(active.can_transition_to(JobStatus::Seeding));
    assert!(active.can_transition_to(JobStatus::Paused));
    assert!(active.can_transition_to(JobStatus::Aborting));
    assert!(active.can_transition_to(JobStatus::ShuttingDown));

    // Must go through a stop sequence first
    assert!(!active.can_transition_to(JobStatus::Inactive));
}

#[test]
fn test_seeding_returns_to_active_or_aborts() {
    let seeding = JobStatus::Seeding;

    assert!(seeding.can_transition_to(JobStatus::Active));
    assert!(seeding.can_transition_to(JobStatus::Aborting));
    assert!(!seeding.can_transition_to(JobStatus::Paused));
}

#[test]
fn test_stop_sequences_end_inactive() {
    assert!(JobStatus::Aborting.can_transition_to(JobStatus::Inactive));
    assert!(JobStatus::ShuttingDown.can_transition_to(JobStatus::Inactive));
    assert!(!JobStatus::Aborting.can_transition_to(JobStatus::Active));
}

#[test]
fn test_processing_states() {
    assert!(JobStatus::Active.is_processing());
    assert!(JobStatus::Seeding.is_processing());
    assert!(!JobStatus::Paused.is_processing());
    assert!(!JobStatus::Aborting.is_processing());
    assert!(!JobStatus::Inactive.is_processing());
}

#[test]
fn test_only_continuous_jobs_are_adaptive() {
    assert!(JobType::Continuous.is_adaptive());
    assert!(!JobType::Specified.is_adaptive());
}
