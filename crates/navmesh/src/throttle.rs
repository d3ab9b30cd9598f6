//! Rate-limited named events

/// Fraction of a period by which accumulated frame time may fall short and still count
const PERIOD_TOLERANCE: f64 = 1e-4;

/// Event that fires on the first tick a condition holds and then at most once per period
#[derive(Debug, Clone, PartialEq)]
pub struct ThrottledEvent {
    name: String,
    /// Seconds between repeats; `None` never repeats
    period: Option<f32>,
    enabled: bool,
    active: bool,
    /// Seconds since the first tick of the current run
    elapsed: f64,
    /// Periods already fired for in the current run
    repeats: u64,
}

impl ThrottledEvent {
    /// Creates an event repeating `frequency` times per second; zero fires only on the first tick
    pub fn new(name: impl Into<String>, frequency: f32) -> Self {
        Self {
            name: name.into(),
            period: period_of(frequency),
            enabled: true,
            active: false,
            elapsed: 0.0,
            repeats: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn set_frequency(&mut self, frequency: f32) {
        self.period = period_of(frequency);
    }

    pub fn period(&self) -> Option<f32> {
        self.period
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Disabling also forgets the current run of true ticks
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.reset();
        }
    }

    /// Advances a tick on which the condition holds; returns whether the event fires
    pub fn tick(&mut self, dt: f32) -> bool {
        if !self.enabled {
            return false;
        }
        if !self.active {
            self.active = true;
            self.elapsed = 0.0;
            self.repeats = 0;
            return true;
        }
        let Some(period) = self.period else {
            return false;
        };
        self.elapsed += f64::from(dt.max(0.0));
        let due = (self.elapsed / f64::from(period) + PERIOD_TOLERANCE).floor() as u64;
        if due > self.repeats {
            self.repeats = due;
            true
        } else {
            false
        }
    }

    /// The condition stopped holding
    pub fn reset(&mut self) {
        self.active = false;
        self.elapsed = 0.0;
        self.repeats = 0;
    }
}

fn period_of(frequency: f32) -> Option<f32> {
    let frequency = frequency.abs();
    (frequency > 0.0 && frequency.is_finite()).then(|| 1.0 / frequency)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_on_first_tick_then_per_period() {
        // 2 seconds at a 0.25 s period with 0.125 s ticks
        let mut event = ThrottledEvent::new("move", 4.0);
        let dt = 0.125;
        let ticks = (2.0 / dt) as usize + 1;
        let fired = (0..ticks).filter(|_| event.tick(dt)).count();
        assert_eq!(fired, 9);
    }

    #[test]
    fn test_inexact_frame_times_keep_count() {
        // floor(seconds * frequency) + 1 fires over `seconds` of true ticks
        for (frequency, dt, expected) in [(10.0, 0.01_f32, 51), (30.0, 1.0 / 60.0, 151), (30.0, 1.0 / 90.0, 151)] {
            let mut event = ThrottledEvent::new("move", frequency);
            let ticks = (5.0 / dt).round() as usize + 1;
            let fired = (0..ticks).filter(|_| event.tick(dt)).count();
            assert_eq!(fired, expected, "{} Hz at dt {}", frequency, dt);
        }
    }

    #[test]
    fn test_long_frame_fires_once() {
        let mut event = ThrottledEvent::new("move", 10.0);
        assert!(event.tick(0.0));
        assert!(event.tick(0.35));
        assert!(!event.tick(0.01));
        assert!(event.tick(0.05));
    }

    #[test]
    fn test_false_edge_resets() {
        let mut event = ThrottledEvent::new("steady", 4.0);
        assert!(event.tick(0.1));
        assert!(!event.tick(0.1));
        event.reset();
        assert!(event.tick(0.1));
        assert!(!event.tick(0.1));
        assert!(event.tick(0.2));
    }

    #[test]
    fn test_zero_frequency_fires_once() {
        let mut event = ThrottledEvent::new("once", 0.0);
        assert_eq!(event.period(), None);
        assert!(event.tick(1.0));
        assert!((0..100).all(|_| !event.tick(1.0)));
    }

    #[test]
    fn test_disabled_never_fires() {
        let mut event = ThrottledEvent::new("off", 30.0);
        event.set_enabled(false);
        assert!(!event.tick(1.0));
        event.set_enabled(true);
        assert!(event.tick(1.0));
    }
}
