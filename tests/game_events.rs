use ethers::types::Address;
use tictactoe_dapp::{
    controller::ControllerEvent,
    game::{
        ChainEvent,
        Phase,
    },
    test_helpers::{
        TestContext,
        next_snapshot_matching,
    },
};

fn phase_is(phase: Phase) -> impl Fn(&tictactoe_dapp::controller::ControllerSnapshot) -> bool {
    move |s| s.view.as_ref().is_some_and(|v| v.phase == phase)
}

#[tokio::test]
async fn game_started__moves_view_into_play() {
    let ctx = TestContext::new();
    // given
    ctx.connect().await;
    let mut events = ctx.controller().subscribe();

    // when
    ctx.contract().set_phase(1);
    assert!(ctx.contract().emit(ChainEvent::GameStarted {
        player_x: TestContext::alice(),
        player_o: TestContext::bob(),
    }));

    // then
    let snap = next_snapshot_matching(&mut events, phase_is(Phase::Playing)).await;
    assert!(snap.status.message.starts_with("Game started!"));
}

#[tokio::test]
async fn game_ended__draw_completes_the_game() {
    let ctx = TestContext::new();
    // given
    let contract = ctx.contract();
    contract.set_phase(1);
    ctx.connect().await;
    let mut events = ctx.controller().subscribe();

    // when
    contract.set_board([[1, 2, 1], [1, 2, 2], [2, 1, 1]]);
    contract.set_phase(2);
    contract.emit(ChainEvent::GameEnded {
        winner: Address::zero(),
        is_draw: true,
    });

    // then
    let snap = next_snapshot_matching(&mut events, phase_is(Phase::Completed)).await;
    assert_eq!(snap.status.message, "Game ended in a draw!");
}

#[tokio::test]
async fn game_ended__opponent_win_names_the_winner() {
    let ctx = TestContext::new();
    // given
    ctx.connect().await;
    let mut events = ctx.controller().subscribe();

    // when
    ctx.contract().set_phase(2);
    ctx.contract().emit(ChainEvent::GameEnded {
        winner: TestContext::bob(),
        is_draw: false,
    });

    // then
    let snap = next_snapshot_matching(&mut events, phase_is(Phase::Completed)).await;
    assert_eq!(snap.status.message, "Game over! Winner: 0xb0b0…b0b0");
}

#[tokio::test]
async fn move_made__is_forwarded_and_refreshes() {
    let ctx = TestContext::new();
    // given
    let contract = ctx.contract();
    contract.set_phase(1);
    ctx.connect().await;
    let mut events = ctx.controller().subscribe();
    let event = ChainEvent::MoveMade {
        player: TestContext::bob(),
        row: 2,
        col: 0,
    };

    // when
    contract.set_board([[0, 0, 0], [0, 0, 0], [2, 0, 0]]);
    contract.emit(event.clone());

    // then
    let forwarded = loop {
        match events.recv().await.unwrap() {
            ControllerEvent::Chain(e) => break e,
            ControllerEvent::StateChanged(_) => continue,
        }
    };
    assert_eq!(forwarded, event);
    let snap = next_snapshot_matching(&mut events, |s| {
        s.view.as_ref().is_some_and(|v| !v.is_open_cell(2, 0))
    })
    .await;
    assert_eq!(snap.view.unwrap().phase, Phase::Playing);
}
