use tictactoe_dapp::{
    game::{
        Cell,
        Mark,
        Phase,
    },
    test_helpers::{
        FakeFailure,
        TestContext,
    },
};

#[tokio::test]
async fn make_move__submits_and_refreshes_board() {
    let ctx = TestContext::new();
    // given
    let contract = ctx.contract();
    contract.set_phase(1);
    ctx.connect().await;
    let controller = ctx.controller();
    assert_eq!(controller.snapshot().view.unwrap().turn, Mark::X);

    // when
    contract.set_board([[0, 0, 0], [0, 1, 0], [0, 0, 0]]);
    contract.set_turn(1);
    controller.make_move(1, 1).await.unwrap();

    // then
    assert_eq!(contract.moves(), vec![(1, 1)]);
    let view = controller.snapshot().view.unwrap();
    assert_eq!(view.board.cell(1, 1), Some(Cell::X));
    assert_eq!(view.turn, Mark::O);
    assert_eq!(view.phase, Phase::Playing);
    assert!(!view.is_open_cell(1, 1));
    assert!(view.is_open_cell(0, 0));
}

#[tokio::test]
async fn make_move__revert_keeps_board_and_clears_busy() {
    let ctx = TestContext::new();
    // given
    let contract = ctx.contract();
    contract.set_phase(1);
    ctx.connect().await;
    let controller = ctx.controller();
    let before = controller.snapshot().view;
    contract.fail_transactions_with(FakeFailure::message("Transaction reverted: Not your turn"));

    // when
    let result = controller.make_move(0, 0).await;

    // then
    assert!(result.is_err());
    let snap = controller.snapshot();
    assert_eq!(snap.view, before);
    assert!(!snap.status.busy);
    assert_eq!(snap.status.message, "Transaction reverted: Not your turn");
}

#[tokio::test]
async fn make_move__second_move_while_pending_is_ignored() {
    let ctx = TestContext::new();
    // given
    let contract = ctx.contract();
    contract.set_phase(1);
    ctx.connect().await;
    let controller = ctx.controller();
    let gate = contract.hold_transactions();
    let first = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.make_move(0, 0).await })
    };
    contract.wait_for_pending_transaction().await;

    // when
    controller.make_move(2, 2).await.unwrap();
    gate.notify_one();
    first.await.unwrap().unwrap();

    // then
    assert_eq!(contract.moves(), vec![(0, 0)]);
}
