//! Edge controller and vision server running together on loopback

mod common;

use std::time::Duration;
use tokio::time::Instant;

use common::{FixedDetector, SharedJoystick, SharedSink, loopback_config, wait_until};
use rovelink::transport::FrameSender;
use rovelink::vision::Detection;
use rovelink::{
    CapturedImage, Config, EdgeHandle, EpochCounter, JoystickState, Mode, Rovelink, ServerHandle, SyntheticCamera,
};

const WAIT: Duration = Duration::from_secs(5);

async fn start_server(config: &Config) -> ServerHandle {
    Rovelink::server(config, FixedDetector(Detection::clear())).await.expect("server should start")
}

fn start_edge(config: &Config, server: &ServerHandle, joystick: SharedJoystick, sink: SharedSink) -> EdgeHandle {
    let mut config = config.clone();
    config.edge.frame_server = server.frame_addr().to_string();
    config.edge.command_server = server.command_addr().to_string();
    Rovelink::edge(&config, SyntheticCamera::new(config.edge.camera_fps), joystick, sink).expect("edge should start")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn camera_frames_drive_the_robot_autonomously() {
    let config = loopback_config();
    let server = start_server(&config).await;
    let sink = SharedSink::default();
    let edge = start_edge(&config, &server, SharedJoystick::default(), sink.clone());

    assert!(wait_until(WAIT, || edge.control_state().mode == Mode::Autonomous).await);
    let applied = sink.last().expect("commands should reach the sink");
    assert_eq!(applied.mode, Mode::Autonomous);
    assert_eq!(applied.velocity, config.policy.cruise_velocity);
    assert_eq!(applied.steering, 0.0);

    assert!(server.latest_frame().is_some());
    assert!(wait_until(WAIT, || server.edge_status().is_some()).await, "status should flow back to the server");
    assert!(edge.frame_session().is_connected());
    assert!(edge.command_session().is_connected());

    let last = edge.shutdown().await;
    assert_eq!(last.mode, Mode::SafeStop);
    assert!(sink.last().unwrap().is_zero());
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn operator_preempts_autonomy_and_hands_back() {
    let config = loopback_config();
    let server = start_server(&config).await;
    let joystick = SharedJoystick::default();
    let sink = SharedSink::default();
    let edge = start_edge(&config, &server, joystick.clone(), sink.clone());

    assert!(wait_until(WAIT, || edge.control_state().mode == Mode::Autonomous).await);

    // throttle axis is inverted: pushing forward reads negative
    joystick.set(Some(JoystickState::new(vec![0.2, -0.6], vec![])));
    assert!(wait_until(WAIT, || edge.control_state().mode == Mode::Manual).await);
    let applied = edge.control_state().last_applied;
    assert!((applied.velocity - 0.6).abs() < 1e-6);
    assert!((applied.steering - 0.2).abs() < 1e-6);

    // centred stick disengages; autonomy resumes once manual input ages out
    joystick.set(Some(JoystickState::new(vec![0.0, 0.0], vec![])));
    assert!(wait_until(WAIT, || edge.control_state().mode == Mode::Autonomous).await);

    edge.shutdown().await;
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn server_outage_holds_safe_stop_until_link_returns() {
    let config = loopback_config();
    let server = start_server(&config).await;
    let sink = SharedSink::default();
    let edge = start_edge(&config, &server, SharedJoystick::default(), sink.clone());
    assert!(wait_until(WAIT, || edge.control_state().mode == Mode::Autonomous).await);

    let frame_addr = server.frame_addr();
    let command_addr = server.command_addr();
    server.shutdown().await;

    assert!(wait_until(WAIT, || edge.control_state().mode == Mode::SafeStop).await);
    let outage = Instant::now() + Duration::from_secs(2);
    while Instant::now() < outage {
        let state = edge.control_state();
        assert_eq!(state.mode, Mode::SafeStop, "no fresh source during the outage");
        assert!(state.last_applied.is_zero());
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let mut restarted = config.clone();
    restarted.server.frame_bind = frame_addr.to_string();
    restarted.server.command_bind = command_addr.to_string();
    let server = start_server(&restarted).await;
    let restarted_at = Instant::now();

    assert!(wait_until(WAIT, || edge.control_state().mode == Mode::Autonomous).await);
    let command = edge.command_link().latest().expect("a command from the new session");
    assert!(command.received_at >= restarted_at);

    edge.shutdown().await;
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn vision_follows_a_restarted_edge_with_an_earlier_epoch() {
    let mut config = loopback_config();
    config.link.frame_idle_timeout_ms = 200;
    let server = start_server(&config).await;

    let mut before = FrameSender::with_epochs(server.frame_addr(), &config, EpochCounter::starting_at(100)).unwrap();
    assert!(
        wait_until(WAIT, || {
            before.send(&CapturedImage::now(vec![1; 64]));
            server.latest_command().is_some_and(|command| command.frame_epoch == 100)
        })
        .await
    );
    drop(before);
    assert!(wait_until(WAIT, || !server.frame_session().is_connected()).await, "frame session should idle out");

    // a rebooted edge whose clock has not been corrected yet
    let mut after = FrameSender::with_epochs(server.frame_addr(), &config, EpochCounter::starting_at(7)).unwrap();
    assert!(
        wait_until(WAIT, || {
            after.send(&CapturedImage::now(vec![2; 64]));
            server.latest_command().is_some_and(|command| command.frame_epoch == 7)
        })
        .await,
        "commands should follow the new frame session"
    );
    assert_eq!(server.frame_session().epoch, 7);

    server.shutdown().await;
}
