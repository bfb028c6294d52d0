// Angular motion policy for the roller
//
// Positions on the wire are multi-turn, in 0.01 degree. The operator works in
// whole degrees within one revolution. These helpers map between the two and
// pick the rotation direction for a seek.

/// One full revolution in 0.01 degree units
pub const CENTIDEGREES_PER_TURN: i32 = 36_000;

/// Seek targets are whole degrees within one revolution, 360 included
pub const SEEK_DEGREES: std::ops::RangeInclusive<i32> = 0..=360;

/// Convert a raw position (0.01 degree) to whole degrees in [0, 360)
pub fn normalize_position(raw: i32) -> i32 {
    (raw / 100).rem_euclid(360)
}

/// Signed shortest rotation from `current` to `target`, both in whole degrees.
///
/// Both angles are reduced into [0, 360) first. The result lies in (-360, 360];
/// positive is clockwise. On an exact tie (180 degrees apart) clockwise wins.
pub fn shortest_path_distance(current: i32, target: i32) -> i32 {
    let current = current.rem_euclid(360);
    let target = target.rem_euclid(360);

    let clockwise = (target - current).rem_euclid(360);
    let counter_clockwise = clockwise - 360;

    if clockwise.abs() <= counter_clockwise.abs() {
        clockwise
    } else {
        counter_clockwise
    }
}

/// Outcome of planning a seek to a within-revolution angle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekPlan {
    /// Current shaft angle, whole degrees in [0, 360)
    pub current_degrees: i32,
    /// Shortest signed path in degrees
    pub distance: i32,
    /// Complete revolutions of the current position, in 0.01 degree
    pub base_turns: i32,
    /// Absolute position command, in 0.01 degree
    pub target: i32,
}

/// Plan an absolute position command that lands on `target_degrees`.
///
/// The target is rebuilt on top of the current revolution. When the short way
/// is counter-clockwise one full turn is taken off so the device's position
/// loop does not unwind the long way around.
///
/// Returns `None` if the target falls outside the i32 position range.
pub fn plan_seek(raw_position: i32, target_degrees: i32) -> Option<SeekPlan> {
    let current_degrees = normalize_position(raw_position);
    let distance = shortest_path_distance(current_degrees, target_degrees);

    let base_turns = (raw_position / CENTIDEGREES_PER_TURN) * CENTIDEGREES_PER_TURN;
    let mut target = base_turns.checked_add(target_degrees.checked_mul(100)?)?;
    if distance < 0 {
        target = target.checked_sub(CENTIDEGREES_PER_TURN)?;
    }

    Some(SeekPlan {
        current_degrees,
        distance,
        base_turns,
        target,
    })
}
