use crate::models::FinishStatus;

pub const WINNER_SCORE: i32 = 100;
pub const LAST_FINISHER_SCORE: i32 = 25;
pub const NON_FINISH_SCORE: i32 = 0;

/// Where a vehicle ended up within its category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// 1-based finishing place.
    Place(i64),
    NonFinish(FinishStatus),
}

/// Normalized score for a placement in a category of `category_size` vehicles.
///
/// First place scores 100 and last place 25, with a linear scale in between
/// rounded half-up. Non-finishers and out-of-range places score 0.
pub fn calculate_score(placement: Placement, category_size: i64) -> i32 {
    let place = match placement {
        Placement::NonFinish(_) => return NON_FINISH_SCORE,
        Placement::Place(place) => place,
    };

    if category_size < 1 || place < 1 || place > category_size {
        return NON_FINISH_SCORE;
    }
    if place == 1 {
        return WINNER_SCORE;
    }
    if place == category_size {
        return LAST_FINISHER_SCORE;
    }

    // 25 + 75 * (n - place) / (n - 1), rounded half-up in integer arithmetic
    let span = i64::from(WINNER_SCORE - LAST_FINISHER_SCORE);
    let numerator = span * (category_size - place);
    let denominator = category_size - 1;
    let rounded = (2 * numerator + denominator) / (2 * denominator);

    LAST_FINISHER_SCORE + rounded as i32
}
