use crate::domain::models::Command;

/// Default flat band around the stick centre
pub const DEFAULT_AXIS_FLAT: f32 = 0.1;

/// Zero out an axis value that falls inside the flat (deadzone) band
pub fn centered_axis(value: f32, flat: f32) -> f32 {
    if value.is_nan() || value.abs() <= flat.abs() {
        0.0
    } else {
        value.clamp(-1.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoystickState {
    Center,
    Left,
    Right,
    Forward,
    Backward,
}

impl JoystickState {
    /// Classify filtered axes. The horizontal axis wins; negative y is forward.
    pub fn from_axes(x: f32, y: f32) -> Self {
        if x < 0.0 {
            Self::Left
        } else if x > 0.0 {
            Self::Right
        } else if y < 0.0 {
            Self::Forward
        } else if y > 0.0 {
            Self::Backward
        } else {
            Self::Center
        }
    }

    pub fn command(self) -> Command {
        match self {
            Self::Center => Command::Stop,
            Self::Left => Command::Left,
            Self::Right => Command::Right,
            Self::Forward => Command::Forward,
            Self::Backward => Command::Backward,
        }
    }
}

/// Turns raw stick samples into commands, emitting only on direction change
#[derive(Debug, Clone)]
pub struct JoystickMapper {
    flat: f32,
    last: JoystickState,
}

impl JoystickMapper {
    pub fn new(flat: f32) -> Self {
        Self {
            flat,
            last: JoystickState::Center,
        }
    }

    pub fn state(&self) -> JoystickState {
        self.last
    }

    pub fn update(&mut self, raw_x: f32, raw_y: f32) -> Option<Command> {
        let x = centered_axis(raw_x, self.flat);
        let y = centered_axis(raw_y, self.flat);
        let next = JoystickState::from_axes(x, y);

        if next == self.last {
            return None;
        }

        tracing::debug!("Joystick {:?} -> {:?}", self.last, next);
        self.last = next;
        Some(next.command())
    }
}

impl Default for JoystickMapper {
    fn default() -> Self {
        Self::new(DEFAULT_AXIS_FLAT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadzone() {
        assert_eq!(centered_axis(0.05, 0.1), 0.0);
        assert_eq!(centered_axis(-0.1, 0.1), 0.0);
        assert_eq!(centered_axis(0.5, 0.1), 0.5);
        assert_eq!(centered_axis(1.7, 0.1), 1.0);
        assert_eq!(centered_axis(f32::NAN, 0.1), 0.0);
    }

    #[test]
    fn test_direction_priority() {
        assert_eq!(JoystickState::from_axes(0.0, 0.0), JoystickState::Center);
        assert_eq!(JoystickState::from_axes(-0.4, -0.9), JoystickState::Left);
        assert_eq!(JoystickState::from_axes(0.0, -0.9), JoystickState::Forward);
        assert_eq!(JoystickState::from_axes(0.0, 0.3), JoystickState::Backward);
        assert_eq!(JoystickState::Center.command(), Command::Stop);
    }

    #[test]
    fn test_mapper_emits_on_change_only() {
        let mut mapper = JoystickMapper::default();
        assert_eq!(mapper.update(0.02, 0.0), None);
        assert_eq!(mapper.update(0.0, -0.8), Some(Command::Forward));
        assert_eq!(mapper.update(0.05, -0.6), None);
        assert_eq!(mapper.update(0.0, 0.0), Some(Command::Stop));
        assert_eq!(mapper.state(), JoystickState::Center);
    }
}
