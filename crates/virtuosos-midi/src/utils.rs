//! Note and velocity helpers shared by instruments.

/// Transposes `note` by `semitones`, clamped to the MIDI note range.
#[inline]
pub fn transpose(note: u8, semitones: i8) -> u8 {
    (note as i16 + semitones as i16).clamp(0, 127) as u8
}

/// `velocity * factor + offset`, truncated and clamped to 0-127.
#[inline]
pub fn scale_velocity(velocity: u8, factor: f32, offset: i16) -> u8 {
    let scaled = (velocity as f32 * factor) as i32 + offset as i32;
    scaled.clamp(0, 127) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transpose_clamps() {
        assert_eq!(transpose(60, 12), 72);
        assert_eq!(transpose(60, -12), 48);
        assert_eq!(transpose(120, 12), 127);
        assert_eq!(transpose(5, -12), 0);
    }

    #[test]
    fn test_scale_velocity() {
        assert_eq!(scale_velocity(100, 1.0, 0), 100);
        assert_eq!(scale_velocity(100, 0.5, 10), 60);
        assert_eq!(scale_velocity(100, 2.0, 0), 127);
        assert_eq!(scale_velocity(10, 1.0, -20), 0);
    }
}
