//! Joystick input
//!
//! Device enumeration lives outside this crate; a [`JoystickSource`] only has
//! to report the current axes and buttons. [`JoystickMapping`] turns that into
//! a [`ManualInput`] when the operator is actually engaged.

use crate::config::JoystickConfig;
use crate::types::ManualInput;

/// Raw joystick reading
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoystickState {
    /// Axis positions in `[-1, 1]`
    pub axes: Vec<f32>,
    /// Button states, pressed is `true`
    pub buttons: Vec<bool>,
}

impl JoystickState {
    pub fn new(axes: Vec<f32>, buttons: Vec<bool>) -> Self {
        Self { axes, buttons }
    }

    /// Axis value, `0.0` for missing or non-finite axes
    pub fn axis(&self, index: usize) -> f32 {
        self.axes.get(index).copied().filter(|v| v.is_finite()).unwrap_or(0.0)
    }

    pub fn button(&self, index: usize) -> bool {
        self.buttons.get(index).copied().unwrap_or(false)
    }
}

/// Source of joystick readings
pub trait JoystickSource: Send + 'static {
    /// Current reading, or `None` while no device is available
    fn poll(&mut self) -> Option<JoystickState>;
}

impl<S: JoystickSource + ?Sized> JoystickSource for Box<S> {
    fn poll(&mut self) -> Option<JoystickState> {
        (**self).poll()
    }
}

/// A joystick that is never connected
#[derive(Debug, Default, Clone, Copy)]
pub struct IdleJoystick;

impl JoystickSource for IdleJoystick {
    fn poll(&mut self) -> Option<JoystickState> {
        None
    }
}

/// Maps joystick readings to manual velocity/steering
#[derive(Debug, Clone)]
pub struct JoystickMapping {
    config: JoystickConfig,
}

impl JoystickMapping {
    pub fn new(config: JoystickConfig) -> Self {
        Self { config }
    }

    /// Manual input for `state`, or `None` when the operator is not engaged
    ///
    /// The operator is engaged while either axis is outside the deadzone or
    /// the deadman button is held. A centred, released stick yields `None` so
    /// that manual control lapses and autonomy can take over.
    pub fn map(&self, state: &JoystickState) -> Option<ManualInput> {
        let mut throttle = state.axis(self.config.throttle_axis);
        if self.config.invert_throttle {
            throttle = -throttle;
        }
        let velocity = self.apply_deadzone(throttle);
        let steering = self.apply_deadzone(state.axis(self.config.steering_axis));

        let deadman = self.config.deadman_button.is_some_and(|button| state.button(button));
        if velocity == 0.0 && steering == 0.0 && !deadman {
            return None;
        }

        Some(ManualInput::new(velocity, steering))
    }

    fn apply_deadzone(&self, value: f32) -> f32 {
        if value.abs() <= self.config.deadzone { 0.0 } else { value.clamp(-1.0, 1.0) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping() -> JoystickMapping {
        JoystickMapping::new(JoystickConfig::default())
    }

    #[test]
    fn stick_up_drives_forward() {
        let input = mapping().map(&JoystickState::new(vec![0.0, -0.8], vec![])).unwrap();
        assert_eq!(input.velocity, 0.8);
        assert_eq!(input.steering, 0.0);
    }

    #[test]
    fn centred_released_stick_is_not_engaged() {
        assert!(mapping().map(&JoystickState::new(vec![0.05, -0.1], vec![false; 8])).is_none());
        assert!(mapping().map(&JoystickState::default()).is_none());
    }

    #[test]
    fn deadman_button_holds_manual_at_zero() {
        let mut buttons = vec![false; 8];
        buttons[4] = true;
        let input = mapping().map(&JoystickState::new(vec![0.0, 0.0], buttons)).unwrap();
        assert_eq!((input.velocity, input.steering), (0.0, 0.0));
    }

    #[test]
    fn axes_are_clamped_and_sanitised() {
        let input = mapping().map(&JoystickState::new(vec![1.7, f32::NAN], vec![])).unwrap();
        assert_eq!(input.steering, 1.0);
        assert_eq!(input.velocity, 0.0);
    }

    #[test]
    fn idle_joystick_reports_nothing() {
        assert!(IdleJoystick.poll().is_none());
    }
}
