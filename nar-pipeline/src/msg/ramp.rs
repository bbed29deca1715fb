//! Linear volume ramps attached to audio messages
//!
//! A ramp describes the gain at the first and last sample of one audio
//! fragment, on a scale of [`RAMP_MIN`]..=[`RAMP_MAX`]. Ramps are merged when
//! several elements (Ramper, Muter) want to shape the same fragment: the lower
//! gain always wins, and opposing ramps that cross inside a fragment split it
//! at the crossing point.

/// Full-scale gain
pub const RAMP_MAX: u32 = 1 << 14;

/// Silence
pub const RAMP_MIN: u32 = 0;

/// Direction of a ramp across its fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RampDirection {
    /// Constant gain
    None,
    /// Gain rises towards full scale
    Up,
    /// Gain falls towards silence
    Down,
    /// Fragment is silent regardless of its contents
    Mute,
}

/// Gain envelope for one audio fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ramp {
    start: u32,
    end: u32,
    direction: RampDirection,
    enabled: bool,
}

/// Second half of a ramp that had to be split at an intersection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RampSplit {
    /// Offset into the fragment (same units as the fragment size) where the split falls
    pub position: u64,
    /// Ramp to apply from `position` onwards
    pub ramp: Ramp,
}

impl Default for Ramp {
    fn default() -> Self {
        Self::new()
    }
}

impl Ramp {
    /// Disabled ramp at full scale
    pub const fn new() -> Self {
        Self {
            start: RAMP_MAX,
            end: RAMP_MAX,
            direction: RampDirection::None,
            enabled: false,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn direction(&self) -> RampDirection {
        self.direction
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether every sample under this ramp is at full scale
    pub fn is_unity(&self) -> bool {
        !self.enabled || (self.start == RAMP_MAX && self.end == RAMP_MAX)
    }

    /// Apply a ramp from `start` in `direction` over a fragment of
    /// `fragment` units, with `remaining` units left before the ramp must
    /// complete.
    ///
    /// The per-fragment delta is rounded up so the ramp always reaches its
    /// target within `remaining`. If an existing ramp runs the opposite way
    /// and the two cross inside the fragment, the fragment must be split:
    /// `self` becomes the first part and the returned [`RampSplit`] describes
    /// the second.
    ///
    /// # Panics
    ///
    /// Panics if `remaining < fragment`, `fragment == 0` or `direction` is
    /// neither `Up` nor `Down`.
    pub fn set(
        &mut self,
        start: u32,
        fragment: u64,
        remaining: u64,
        direction: RampDirection,
    ) -> Option<RampSplit> {
        assert!(fragment > 0, "ramp over an empty fragment");
        assert!(remaining >= fragment, "ramp fragment exceeds remaining duration");
        assert!(
            matches!(direction, RampDirection::Up | RampDirection::Down),
            "ramp direction must be Up or Down"
        );
        self.enabled = true;

        let ramp_remaining = match direction {
            RampDirection::Down => start,
            _ => RAMP_MAX - start,
        } as u128;
        let delta =
            ((ramp_remaining * fragment as u128 + remaining as u128 - 1) / remaining as u128) as u32;
        let ramp_end = match direction {
            RampDirection::Down => start.saturating_sub(delta),
            _ => (start + delta).min(RAMP_MAX),
        };

        let mut split = None;
        if self.direction == RampDirection::None {
            self.direction = direction;
            self.start = start;
            self.end = ramp_end;
        } else if self.direction == direction {
            self.select_lower_points(start, ramp_end);
        } else {
            // Lines (0, y1)..(fragment, y2) and (0, y3)..(fragment, y4), where
            // y1 is the lower of the two starting gains.
            let (y1, y2, y3, y4) = if self.start < start {
                (self.start as i64, self.end as i64, start as i64, ramp_end as i64)
            } else {
                (start as i64, ramp_end as i64, self.start as i64, self.end as i64)
            };
            let denominator = (y2 - y1) - (y4 - y3);
            if denominator == 0 {
                self.select_lower_points(start, ramp_end);
            } else {
                let x = (fragment as i128 * (y3 - y1) as i128) / denominator as i128;
                if x <= 0 || x as u64 >= fragment {
                    self.select_lower_points(start, ramp_end);
                } else {
                    let y = (((y2 - y1) as i128 * (y3 - y1) as i128) / denominator as i128) as i64
                        + y1;
                    let y = y.clamp(RAMP_MIN as i64, RAMP_MAX as i64) as u32;
                    let second_end = self.end.min(ramp_end);
                    let second = Ramp {
                        start: y,
                        end: second_end,
                        direction: if y == second_end {
                            RampDirection::None
                        } else {
                            RampDirection::Down
                        },
                        enabled: true,
                    };
                    let first_start = self.start.min(start);
                    self.start = first_start;
                    self.end = y;
                    self.direction = if first_start == y {
                        RampDirection::None
                    } else {
                        RampDirection::Up
                    };
                    split = Some(RampSplit {
                        position: x as u64,
                        ramp: second,
                    });
                }
            }
        }

        debug_assert!(self.is_valid(), "invalid ramp {:?}", self);
        split
    }

    /// Force the fragment to silence
    pub fn set_muted(&mut self) {
        self.start = RAMP_MIN;
        self.end = RAMP_MIN;
        self.direction = RampDirection::Mute;
        self.enabled = true;
    }

    /// Shorten this ramp to cover the first `new_size` of `current_size`
    /// units, returning the ramp for the remainder
    pub fn split(&mut self, new_size: u64, current_size: u64) -> Ramp {
        let mut remaining = Ramp {
            start: RAMP_MAX,
            end: self.end,
            direction: self.direction,
            enabled: true,
        };
        match self.direction {
            RampDirection::Up => {
                let span = ((self.end - self.start) as u128 * new_size as u128)
                    / current_size as u128;
                self.end = self.start + span as u32;
            }
            RampDirection::Down => {
                let span = ((self.start - self.end) as u128 * new_size as u128)
                    / current_size as u128;
                self.end = self.start - span as u32;
            }
            RampDirection::None | RampDirection::Mute => {}
        }
        if self.start == self.end && self.direction != RampDirection::Mute {
            self.direction = RampDirection::None;
        }
        remaining.start = self.end;
        if remaining.start == remaining.end && remaining.direction != RampDirection::Mute {
            remaining.direction = RampDirection::None;
        }
        remaining
    }

    /// Gain for sample `index` of a fragment holding `num_samples` samples
    ///
    /// Interpolates linearly so the first sample gets `start` and the last
    /// gets `end`.
    pub fn gain_at(&self, index: u64, num_samples: u64) -> u32 {
        if !self.enabled {
            return RAMP_MAX;
        }
        if num_samples <= 1 {
            return self.start;
        }
        let span = self.end as i64 - self.start as i64;
        let step = (span as i128 * index as i128) / (num_samples as i128 - 1);
        (self.start as i64 + step as i64) as u32
    }

    fn select_lower_points(&mut self, requested_start: u32, requested_end: u32) {
        self.start = self.start.min(requested_start);
        self.end = self.end.min(requested_end);
        self.direction = match self.start.cmp(&self.end) {
            std::cmp::Ordering::Equal => RampDirection::None,
            std::cmp::Ordering::Greater => RampDirection::Down,
            std::cmp::Ordering::Less => RampDirection::Up,
        };
    }

    fn is_valid(&self) -> bool {
        if self.start > RAMP_MAX || self.end > RAMP_MAX {
            return false;
        }
        match self.direction {
            RampDirection::None => self.start == self.end,
            RampDirection::Up => self.start < self.end,
            RampDirection::Down => self.start > self.end,
            RampDirection::Mute => self.start == RAMP_MIN && self.end == RAMP_MIN,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_ramp_is_disabled_full_scale() {
        let ramp = Ramp::new();
        assert!(!ramp.is_enabled());
        assert!(ramp.is_unity());
        assert_eq!(ramp.gain_at(3, 10), RAMP_MAX);
    }

    #[test]
    fn test_ramp_up_rounds_delta_up() {
        let mut ramp = Ramp::new();
        // 1/3 of the way: 16384 / 3 = 5461.33 -> 5462
        assert!(ramp.set(RAMP_MIN, 1, 3, RampDirection::Up).is_none());
        assert_eq!(ramp.start(), 0);
        assert_eq!(ramp.end(), 5462);
        assert_eq!(ramp.direction(), RampDirection::Up);
    }

    #[test]
    fn test_ramp_up_clamps_at_full_scale() {
        let mut ramp = Ramp::new();
        ramp.set(16_000, 10, 10, RampDirection::Up);
        assert_eq!(ramp.end(), RAMP_MAX);
    }

    #[test]
    fn test_ramp_down_complete_reaches_min() {
        let mut ramp = Ramp::new();
        ramp.set(RAMP_MAX, 100, 100, RampDirection::Down);
        assert_eq!(ramp.end(), RAMP_MIN);
        assert_eq!(ramp.direction(), RampDirection::Down);
    }

    #[test]
    fn test_same_direction_selects_lower_points() {
        let mut ramp = Ramp::new();
        ramp.set(8_000, 100, 200, RampDirection::Down);
        let existing_end = ramp.end();
        ramp.set(RAMP_MAX, 100, 100, RampDirection::Down);
        assert_eq!(ramp.start(), 8_000);
        assert_eq!(ramp.end(), RAMP_MIN.min(existing_end));
    }

    #[test]
    fn test_opposing_ramps_split_at_intersection() {
        let mut ramp = Ramp::new();
        // Existing ramp down from full scale to silence
        ramp.set(RAMP_MAX, 1000, 1000, RampDirection::Down);
        // New ramp up from silence to full scale crosses at the midpoint
        let split = ramp
            .set(RAMP_MIN, 1000, 1000, RampDirection::Up)
            .expect("ramps should intersect");
        assert_eq!(split.position, 500);
        assert_eq!(ramp.start(), RAMP_MIN);
        assert_eq!(ramp.end(), RAMP_MAX / 2);
        assert_eq!(ramp.direction(), RampDirection::Up);
        assert_eq!(split.ramp.start(), RAMP_MAX / 2);
        assert_eq!(split.ramp.end(), RAMP_MIN);
        assert_eq!(split.ramp.direction(), RampDirection::Down);
    }

    #[test]
    fn test_opposing_ramps_without_intersection_take_lower() {
        let mut ramp = Ramp::new();
        ramp.set(4_000, 100, 400, RampDirection::Down);
        assert!(ramp.set(RAMP_MIN, 100, 10_000, RampDirection::Up).is_none());
        assert_eq!(ramp.start(), RAMP_MIN);
    }

    #[test]
    fn test_split_interpolates() {
        let mut ramp = Ramp::new();
        ramp.set(RAMP_MIN, 100, 100, RampDirection::Up);
        let remaining = ramp.split(25, 100);
        assert_eq!(ramp.end(), RAMP_MAX / 4);
        assert_eq!(remaining.start(), RAMP_MAX / 4);
        assert_eq!(remaining.end(), RAMP_MAX);
        assert_eq!(remaining.direction(), RampDirection::Up);
    }

    #[test]
    fn test_set_muted() {
        let mut ramp = Ramp::new();
        ramp.set_muted();
        assert!(ramp.is_enabled());
        assert_eq!(ramp.direction(), RampDirection::Mute);
        assert_eq!(ramp.gain_at(0, 10), RAMP_MIN);
    }

    #[test]
    fn test_gain_interpolation_endpoints() {
        let mut ramp = Ramp::new();
        ramp.set(RAMP_MIN, 10, 10, RampDirection::Up);
        assert_eq!(ramp.gain_at(0, 10), RAMP_MIN);
        assert_eq!(ramp.gain_at(9, 10), RAMP_MAX);
        let gains: Vec<u32> = (0..10).map(|i| ramp.gain_at(i, 10)).collect();
        assert!(gains.windows(2).all(|w| w[0] <= w[1]));
    }
}
