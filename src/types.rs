use serde::{Deserialize, Serialize};

/// Identifies one of the two decks the engine owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeckId {
    Zero,
    One,
}

impl DeckId {
    pub(crate) fn other(self) -> DeckId {
        match self {
            DeckId::Zero => DeckId::One,
            DeckId::One => DeckId::Zero,
        }
    }

    pub fn from_index(index: u8) -> Option<DeckId> {
        match index {
            0 => Some(DeckId::Zero),
            1 => Some(DeckId::One),
            _ => None,
        }
    }
}

/// Three-band EQ gains, linear scale (1.0 = unity).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EqParams {
    pub low_gain: f32,
    pub mid_gain: f32,
    pub high_gain: f32,
}

impl Default for EqParams {
    fn default() -> Self {
        EqParams {
            low_gain: 1.0,
            mid_gain: 1.0,
            high_gain: 1.0,
        }
    }
}

impl EqParams {
    pub(crate) fn approx_eq(&self, other: &Self) -> bool {
        const EPSILON: f32 = 1e-5;
        (self.low_gain - other.low_gain).abs() < EPSILON
            && (self.mid_gain - other.mid_gain).abs() < EPSILON
            && (self.high_gain - other.high_gain).abs() < EPSILON
    }
}

/// Notification posted roughly every `POSITION_UPDATE_INTERVAL_MS` with
/// each deck's current source-time position, in seconds.
#[derive(Debug, Clone, Copy)]
pub struct PositionUpdate {
    pub deck_id: DeckId,
    pub position_seconds: f64,
}

/// Notification posted once when a deck's source is exhausted.
#[derive(Debug, Clone, Copy)]
pub struct EndOfTrack {
    pub deck_id: DeckId,
}

pub type PositionCallback = Box<dyn Fn(PositionUpdate) + Send + Sync>;
pub type EndOfTrackCallback = Box<dyn Fn(EndOfTrack) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eq_params_default_is_unity() {
        let params = EqParams::default();
        assert!(params.approx_eq(&EqParams {
            low_gain: 1.0,
            mid_gain: 1.0,
            high_gain: 1.0,
        }));
    }

    #[test]
    fn eq_params_approx_eq_rejects_differing_bands() {
        let a = EqParams::default();
        let b = EqParams {
            low_gain: 1.2,
            ..a
        };
        assert!(!a.approx_eq(&b));
    }

    #[test]
    fn deck_id_other_is_involutive() {
        assert_eq!(DeckId::Zero.other(), DeckId::One);
        assert_eq!(DeckId::One.other(), DeckId::Zero);
        assert_eq!(DeckId::Zero.other().other(), DeckId::Zero);
    }
}
