//! Address activity derivation.
//!
//! Walks a fully decoded block batch and folds every touched address into
//! the batch's delta map. Each counter tracks a role: miner, mint payee,
//! value-transfer party, data-request funder, committer, revealer, tally
//! party. An address appearing several times in one transaction counts
//! once for that transaction.

use std::collections::BTreeSet;

use crate::storage::EpochBatch;

fn unique(groups: &[&[String]]) -> Vec<String> {
    let set: BTreeSet<&str> = groups
        .iter()
        .flat_map(|group| group.iter())
        .map(String::as_str)
        .collect();
    set.into_iter().map(str::to_string).collect()
}

/// Fill `batch.address_deltas` from the decoded records.
pub fn derive_address_deltas(batch: &mut EpochBatch, miner: &str) {
    batch.add_delta(miner, |d| d.blocks += 1);

    let mints: Vec<Vec<String>> = batch
        .mints
        .iter()
        .map(|rec| unique(&[&rec.output_addresses]))
        .collect();
    let vts: Vec<Vec<String>> = batch
        .value_transfers
        .iter()
        .map(|rec| unique(&[&rec.input_addresses, &rec.output_addresses]))
        .collect();
    let drs: Vec<Vec<String>> = batch
        .data_requests
        .iter()
        .map(|rec| unique(&[&rec.input_addresses]))
        .collect();
    let commits: Vec<String> = batch
        .commits
        .iter()
        .map(|rec| rec.txn_address.clone())
        .collect();
    let reveals: Vec<String> = batch
        .reveals
        .iter()
        .map(|rec| rec.txn_address.clone())
        .collect();
    let tallies: Vec<Vec<String>> = batch
        .tallies
        .iter()
        .map(|rec| {
            unique(&[
                &rec.output_addresses,
                &rec.error_addresses,
                &rec.liar_addresses,
            ])
        })
        .collect();

    for address in mints.iter().flatten() {
        batch.add_delta(address, |d| d.mints += 1);
    }
    for address in vts.iter().flatten() {
        batch.add_delta(address, |d| d.value_transfers += 1);
    }
    for address in drs.iter().flatten() {
        batch.add_delta(address, |d| d.data_requests += 1);
    }
    for address in &commits {
        batch.add_delta(address, |d| d.commits += 1);
    }
    for address in &reveals {
        batch.add_delta(address, |d| d.reveals += 1);
    }
    for address in tallies.iter().flatten() {
        batch.add_delta(address, |d| d.tallies += 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{BlockRecord, MintRecord, TallyRecord, ValueTransferRecord};
    use witscan_core::Hash;

    fn empty_batch(epoch: u32) -> EpochBatch {
        EpochBatch::new(BlockRecord {
            block_hash: Hash::new([1; 32]),
            epoch,
            ..Default::default()
        })
    }

    #[test]
    fn miner_counts_one_block() {
        let mut batch = empty_batch(10);
        derive_address_deltas(&mut batch, "wit1miner");
        let delta = &batch.address_deltas["wit1miner"];
        assert_eq!(delta.blocks, 1);
        assert_eq!(delta.active, 10);
    }

    #[test]
    fn duplicate_address_in_one_txn_counts_once() {
        let mut batch = empty_batch(20);
        batch.value_transfers.push(ValueTransferRecord {
            txn_hash: Hash::new([2; 32]),
            epoch: 20,
            input_addresses: vec!["wit1a".into(), "wit1a".into()],
            input_values: vec![10, 10],
            input_pointers: vec![],
            output_addresses: vec!["wit1a".into(), "wit1b".into()],
            output_values: vec![5, 15],
            true_value: 15,
            change_value: 5,
            fee: 0,
            weight: 338,
            priority: 0,
        });
        derive_address_deltas(&mut batch, "wit1miner");
        assert_eq!(batch.address_deltas["wit1a"].value_transfers, 1);
        assert_eq!(batch.address_deltas["wit1b"].value_transfers, 1);
    }

    #[test]
    fn all_tally_parties_count() {
        let mut batch = empty_batch(30);
        batch.mints.push(MintRecord {
            txn_hash: Hash::new([3; 32]),
            epoch: 30,
            miner: "wit1miner".into(),
            output_addresses: vec!["wit1miner".into()],
            output_values: vec![100],
        });
        batch.tallies.push(TallyRecord {
            txn_hash: Hash::new([4; 32]),
            epoch: 30,
            data_request: Hash::new([5; 32]),
            output_addresses: vec!["wit1honest".into()],
            output_values: vec![50],
            error_addresses: vec!["wit1err".into()],
            liar_addresses: vec!["wit1liar".into()],
            result: vec![],
            success: false,
        });
        derive_address_deltas(&mut batch, "wit1miner");

        assert_eq!(batch.address_deltas["wit1miner"].mints, 1);
        assert_eq!(batch.address_deltas["wit1honest"].tallies, 1);
        assert_eq!(batch.address_deltas["wit1err"].tallies, 1);
        assert_eq!(batch.address_deltas["wit1liar"].tallies, 1);
    }
}
