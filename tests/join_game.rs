use ethers::types::U256;
use tictactoe_dapp::{
    game::Phase,
    status::TRANSACTION_CANCELLED,
    test_helpers::{
        FakeFailure,
        TestContext,
        drain_snapshots,
    },
};

#[tokio::test]
async fn join_game__waiting_player_joins_with_stake() {
    let ctx = TestContext::new();
    // given
    let contract = ctx.contract();
    contract.set_stake(U256::exp10(17));
    ctx.connect().await;
    let controller = ctx.controller();
    let view = controller.snapshot().view.unwrap();
    assert_eq!(view.phase, Phase::Waiting);
    assert_eq!(view.stake_amount, "0.1");

    // when
    controller.join_game().await.unwrap();

    // then
    assert_eq!(contract.joins(), vec![U256::exp10(17)]);
    assert!(!controller.snapshot().status.busy);
}

#[tokio::test]
async fn join_game__pays_the_stake_read_at_submission() {
    let ctx = TestContext::new();
    // given
    let contract = ctx.contract();
    contract.set_stake(U256::exp10(17));
    ctx.connect().await;
    contract.set_stake(U256::exp10(18));

    // when
    ctx.controller().join_game().await.unwrap();

    // then
    assert_eq!(contract.joins(), vec![U256::exp10(18)]);
    assert_eq!(ctx.controller().snapshot().view.unwrap().stake_amount, "1");
}

#[tokio::test]
async fn join_game__busy_spans_the_whole_transaction() {
    let ctx = TestContext::new();
    // given
    ctx.connect().await;
    let controller = ctx.controller();
    let mut events = controller.subscribe();

    // when
    controller.join_game().await.unwrap();

    // then
    let snapshots = drain_snapshots(&mut events);
    let busy: Vec<bool> = snapshots.iter().map(|s| s.status.busy).collect();
    let first_idle = busy.iter().position(|b| !b).unwrap();
    assert!(first_idle > 0);
    assert!(busy[..first_idle].iter().all(|b| *b));
    assert!(busy[first_idle..].iter().all(|b| !b));
}

#[tokio::test]
async fn join_game__rejection_reads_transaction_cancelled() {
    let ctx = TestContext::new();
    // given
    ctx.connect().await;
    ctx.contract().fail_transactions_with(FakeFailure::message(
        "(code: 4001, message: User rejected the request., data: None)",
    ));

    // when
    let result = ctx.controller().join_game().await;

    // then
    assert!(result.is_err());
    let status = ctx.controller().snapshot().status;
    assert_eq!(status.message, TRANSACTION_CANCELLED);
    assert!(!status.busy);
}

#[tokio::test]
async fn join_game__failed_join_can_be_retried() {
    let ctx = TestContext::new();
    // given
    ctx.connect().await;
    let contract = ctx.contract();
    contract.fail_transactions_with(FakeFailure::Rejected);
    assert!(ctx.controller().join_game().await.is_err());

    // when
    contract.clear_transaction_failure();
    ctx.controller().join_game().await.unwrap();

    // then
    assert_eq!(contract.joins().len(), 1);
    assert!(!ctx.controller().snapshot().status.busy);
}
