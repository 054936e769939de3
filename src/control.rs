//! Control tick
//!
//! The only writer of [`ControlState`]. Every tick it reads the latest manual
//! input and autonomous command, lets the [`ModeArbiter`] decide, hands the
//! result to the actuation sink and publishes the new state.

use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::actuation::ActuationSink;
use crate::arbiter::ModeArbiter;
use crate::register::{RegisterReader, RegisterWriter};
use crate::types::{Command, ControlState, EffectiveCommand, ManualInput};

/// Fixed-rate control loop
pub struct ControlLoop<S> {
    arbiter: ModeArbiter,
    sink: S,
    manual: RegisterReader<ManualInput>,
    autonomous: RegisterReader<Command>,
    state: RegisterWriter<ControlState>,
    period: Duration,
    actuation_faults: u64,
    consecutive_faults: u64,
}

impl<S: ActuationSink> ControlLoop<S> {
    pub fn new(
        arbiter: ModeArbiter,
        sink: S,
        manual: RegisterReader<ManualInput>,
        autonomous: RegisterReader<Command>,
        state: RegisterWriter<ControlState>,
        period: Duration,
    ) -> Self {
        Self {
            arbiter,
            sink,
            manual,
            autonomous,
            state,
            period,
            actuation_faults: 0,
            consecutive_faults: 0,
        }
    }

    pub fn state(&self) -> &ControlState {
        self.arbiter.state()
    }

    /// Total number of sink errors so far
    pub fn actuation_faults(&self) -> u64 {
        self.actuation_faults
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Run one tick at `now`
    pub fn step(&mut self, now: Instant) -> EffectiveCommand {
        let command = self.arbiter.tick(now, self.manual.latest(), self.autonomous.latest());
        self.deliver(command);
        self.state.publish_at(*self.arbiter.state(), now);
        command
    }

    fn deliver(&mut self, command: EffectiveCommand) {
        let command = EffectiveCommand::new(command.mode, command.velocity, command.steering);
        match self.sink.apply(command) {
            Ok(()) => {
                if self.consecutive_faults > 0 {
                    info!("Actuation recovered after {} failed ticks", self.consecutive_faults);
                }
                self.consecutive_faults = 0;
            }
            Err(e) => {
                self.actuation_faults += 1;
                self.consecutive_faults += 1;
                if self.consecutive_faults == 1 {
                    warn!("Actuation failed: {}", e);
                } else {
                    debug!("Actuation still failing ({} ticks): {}", self.consecutive_faults, e);
                }
            }
        }
    }

    /// Tick until `cancel` fires, then apply a final SafeStop
    pub async fn run(mut self, cancel: CancellationToken) -> ControlState {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Control loop started at {:?} per tick", self.period);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.step(Instant::now());
                }
            }
        }

        let stop = self.arbiter.force_safe_stop();
        self.deliver(stop);
        self.state.publish(*self.arbiter.state());
        info!(
            "Control loop stopped after {} ticks ({} actuation faults)",
            self.arbiter.state().ticks,
            self.actuation_faults
        );
        *self.arbiter.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbiter::FreshnessWindows;
    use crate::register::register;
    use crate::test_utils::RecordingSink;
    use crate::types::Mode;

    struct Harness {
        manual: RegisterWriter<ManualInput>,
        autonomous: RegisterWriter<Command>,
        state: RegisterReader<ControlState>,
        sink: RecordingSink,
        control: ControlLoop<RecordingSink>,
    }

    fn harness(sink: RecordingSink) -> Harness {
        let (manual_tx, manual_rx) = register();
        let (autonomous_tx, autonomous_rx) = register();
        let (state_tx, state_rx) = register();
        let control = ControlLoop::new(
            ModeArbiter::new(FreshnessWindows::default()),
            sink.clone(),
            manual_rx,
            autonomous_rx,
            state_tx,
            Duration::from_millis(20),
        );
        Harness { manual: manual_tx, autonomous: autonomous_tx, state: state_rx, sink, control }
    }

    #[tokio::test(start_paused = true)]
    async fn step_applies_and_publishes() {
        let mut h = harness(RecordingSink::new());
        let now = Instant::now();
        h.autonomous.publish_at(Command::new(1, 1, 0.4, 0.1), now);

        let applied = h.control.step(now);
        assert_eq!(applied.mode, Mode::Autonomous);
        assert_eq!(h.sink.last(), Some(applied));
        assert_eq!(h.state.latest().unwrap().value.mode, Mode::Autonomous);
        assert_eq!(h.state.latest().unwrap().value.ticks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sink_faults_do_not_stop_the_loop() {
        let mut h = harness(RecordingSink::failing());
        let now = Instant::now();
        for i in 0..3 {
            h.control.step(now + Duration::from_millis(20 * i));
        }
        assert_eq!(h.control.actuation_faults(), 3);
        assert_eq!(h.sink.applied().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_ends_with_safe_stop() {
        let h = harness(RecordingSink::new());
        h.manual.publish(ManualInput::new(0.7, 0.0));

        let cancel = CancellationToken::new();
        let task = tokio::spawn(h.control.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.sink.last().unwrap().mode, Mode::Manual);

        cancel.cancel();
        let final_state = task.await.unwrap();
        assert_eq!(final_state.mode, Mode::SafeStop);
        assert_eq!(h.sink.last(), Some(EffectiveCommand::SAFE_STOP));
        assert_eq!(h.state.latest().unwrap().value.mode, Mode::SafeStop);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_falls_to_safe_stop_when_inputs_age_out() {
        let h = harness(RecordingSink::new());
        h.autonomous.publish(Command::new(1, 1, 0.5, 0.0));

        let cancel = CancellationToken::new();
        let task = tokio::spawn(h.control.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(h.sink.last().unwrap().mode, Mode::Autonomous);

        // window is 500 ms; the next tick after that must stop
        tokio::time::sleep(Duration::from_millis(130)).await;
        let last = h.sink.last().unwrap();
        assert_eq!(last, EffectiveCommand::SAFE_STOP);

        cancel.cancel();
        task.await.unwrap();
    }
}
