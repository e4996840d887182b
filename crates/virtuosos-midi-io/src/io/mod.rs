//! Hardware MIDI I/O.
//!
//! Device enumeration and connection via midir. Requires the `midi-io` feature.

mod input;
mod output;

pub use input::{list_input_devices, MidiInputDevice, MidiInputSource};
pub use output::{list_output_devices, MidiOutputDevice, MidiOutputSink};

/// Index of the first device whose name contains `pattern`, case-insensitively.
pub(crate) fn find_device_index<'a>(
    names: impl IntoIterator<Item = &'a str>,
    pattern: &str,
) -> Option<usize> {
    let pattern = pattern.to_lowercase();
    names
        .into_iter()
        .position(|name| name.to_lowercase().contains(&pattern))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_device_index_substring_match() {
        let names = ["IAC Driver Bus 1", "Roland TD-17", "USB MIDI Interface"];
        assert_eq!(find_device_index(names, "td-17"), Some(1));
        assert_eq!(find_device_index(names, "usb"), Some(2));
        assert_eq!(find_device_index(names, "Launchpad"), None);
    }
}
