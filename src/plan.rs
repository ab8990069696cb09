//! Replication planner
//!
//! Pure decisions over snapshot name lists: where a source dataset lands
//! on the destination, which snapshots both sides share, and whether the
//! next transfer is full, incremental or nothing at all. Malformed names
//! surface as typed errors so the client can skip the dataset and log
//! instead of tearing the cycle down.

use crate::error::PlanError;

/// The transfer (if any) that converges a dataset towards the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
	/// Full send of one seed snapshot
	Full { snapshot: String },

	/// Incremental send from a common base to the newest source snapshot
	Incremental { base: String, target: String },

	/// Destination already holds the newest source snapshot
	UpToDate,
}

/// Map a source dataset onto the destination root: the source pool prefix
/// is stripped and the rest lands under `storage`
pub fn destination_dataset(storage: &str, source: &str) -> Result<String, PlanError> {
	let rest = match source.split_once('/') {
		Some((_pool, rest)) => rest,
		None => return Err(PlanError::DatasetWithoutPool(source.to_string())),
	};
	Ok(format!("{}/{}", storage.trim_end_matches('/'), rest))
}

/// Whether `dataset` is the storage root itself or lives under it.
/// Path-segment comparison, so `backup` never claims `backup2/...`.
pub fn within_storage(storage: &str, dataset: &str) -> bool {
	let root = storage.trim_end_matches('/');
	match dataset.strip_prefix(root) {
		Some("") => true,
		Some(rest) => rest.starts_with('/'),
		None => false,
	}
}

/// The suffix class of a snapshot: everything after the final `.`
pub fn suffix(snapshot: &str) -> Result<&str, PlanError> {
	match snapshot.rfind('.') {
		Some(pos) => Ok(&snapshot[pos + 1..]),
		None => Err(PlanError::SnapshotWithoutSuffix(snapshot.to_string())),
	}
}

/// Source snapshots that also exist on the destination, in source order.
/// A non-empty result's last element is a valid incremental base: both
/// sides agree it exists.
pub fn intersection(source: &[String], destination: &[String]) -> Vec<String> {
	source
		.iter()
		.filter(|snapshot| destination.contains(*snapshot))
		.cloned()
		.collect()
}

/// Seed snapshot for a full send: the latest snapshot whose suffix class
/// matches the earliest snapshot's class, so the initial replication is
/// anchored on a stable coarse cadence instead of fine-grained churn
pub fn pick_full_base(source: &[String]) -> Result<String, PlanError> {
	let mut sorted = source.to_vec();
	sorted.sort();
	let anchor = match sorted.first() {
		Some(first) => first.clone(),
		None => return Err(PlanError::NoSnapshots),
	};
	let class = suffix(&anchor)?.to_string();
	let mut result = anchor;
	for snapshot in &sorted {
		if suffix(snapshot)? == class {
			result = snapshot.clone();
		}
	}
	Ok(result)
}

/// Apply the planning decision table to one dataset
pub fn decide(
	source: &[String],
	destination_exists: bool,
	destination: &[String],
) -> Result<Action, PlanError> {
	let newest = match source.last() {
		Some(snapshot) => snapshot,
		None => return Err(PlanError::NoSnapshots),
	};

	if !destination_exists {
		return Ok(Action::Full { snapshot: pick_full_base(source)? });
	}

	let common = intersection(source, destination);
	match common.last() {
		None => Ok(Action::Full { snapshot: pick_full_base(source)? }),
		Some(base) if base == newest => Ok(Action::UpToDate),
		Some(base) => Ok(Action::Incremental { base: base.clone(), target: newest.clone() }),
	}
}


// vim: ts=4
