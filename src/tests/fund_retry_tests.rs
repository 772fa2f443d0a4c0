//! Test for the funding retry policy
//!
//! Validates:
//! - Three "value not conserved" rejections then success: one transaction, 2+4+6 s of waits
//! - A persistent rejection gives up after the fifth attempt
//! - Other submit failures are not retried

#[cfg(test)]
mod fund_retry_tests {
    use std::time::Duration;

    use crate::errors::ToolkitError;
    use crate::test_utils::TestNode;

    const TREASURY_UTXOS: &str = "4e1c 0 100000000000 lovelace + TxOutDatumHashNone\n";
    const RACE: &str = "Command failed: transaction submit  Error: Error while submitting tx: \
        ShelleyTxValidationError ShelleyBasedEraAlonzo (ApplyTxError [UtxowFailure \
        (WrappedShelleyEraFailure (UtxoFailure (ValueNotConservedUTxO \
        (Value 0 (fromList [])) (Value 100000000000 (fromList [])))))])";

    fn funded_node() -> TestNode {
        let node = TestNode::new();
        node.runner.respond_utxos("addr_test1treasury", TREASURY_UTXOS);
        node
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_races_then_success() {
        let node = funded_node();
        node.runner.fail_times("transaction submit", RACE, 3);
        let start = tokio::time::Instant::now();

        let tx = node
            .orchestrator()
            .fund_wallet("addr_test1_target", "1000000000")
            .await
            .unwrap()
            .unwrap();

        assert!(start.elapsed() >= Duration::from_secs(12));
        assert!(start.elapsed() < Duration::from_secs(13));
        assert_eq!(node.runner.count("transaction submit"), 4);
        // every attempt re-selects its source
        assert_eq!(node.runner.count("query utxo"), 4);
        assert_eq!(Some(tx.id), node.runner.last_signed_tx_id());
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_race_exhausts_attempts() {
        let node = funded_node();
        node.runner.fail("transaction submit", RACE);
        let start = tokio::time::Instant::now();

        let err = node
            .orchestrator()
            .fund_wallet("addr_test1_target", "1000000000")
            .await
            .unwrap_err();

        assert!(matches!(err, ToolkitError::RetriesExhausted { attempts: 5, .. }));
        assert!(err.is_value_not_conserved());
        assert!(err.to_string().contains("ValueNotConservedUTxO"));
        assert_eq!(node.runner.count("transaction submit"), 5);
        assert!(start.elapsed() >= Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_rejections_fail_fast() {
        let node = funded_node();
        node.runner.fail("transaction submit", "BadInputsUTxO (fromList [TxIn 4e1c 0])");

        let err = node
            .orchestrator()
            .fund_wallet("addr_test1_target", "1000000000")
            .await
            .unwrap_err();

        assert_eq!(err.category(), "process");
        assert!(err.to_string().contains("BadInputsUTxO"));
        assert_eq!(node.runner.count("transaction submit"), 1);
    }
}
