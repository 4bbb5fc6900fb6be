//! RGB to xterm-256 color conversion for console clients.

/// Boundaries between adjacent levels of the 6x6x6 color cube
/// (`00 5f 87 af d7 ff`).
const MIDPOINTS: [u32; 5] = [0x2f, 0x73, 0x9b, 0xc3, 0xeb];

/// Convert an `RRGGBB` hex string into an xterm SGR fragment such as
/// `38;5;188`, usable as `\x1b[{}m`.
///
/// Bright colors are darkened first so they stay readable on dark terminals.
/// Returns an empty string for anything that is not six hex digits.
pub fn rgb_to_xterm256(rgb: &str) -> String {
    let Some([r, g, b]) = parse_rgb(rgb) else {
        return String::new();
    };

    let [r, g, b] = if r + g + b > 500 {
        [r, g, b].map(darken)
    } else {
        [r, g, b]
    };

    let [rx, gx, bx] = [r, g, b].map(cube_index);
    format!("38;5;{}", rx * 36 + gx * 6 + bx + 16)
}

fn parse_rgb(rgb: &str) -> Option<[u32; 3]> {
    if rgb.len() != 6 || !rgb.is_ascii() {
        return None;
    }
    let channel = |range: std::ops::Range<usize>| u32::from_str_radix(&rgb[range], 16).ok();
    Some([channel(0..2)?, channel(2..4)?, channel(4..6)?])
}

fn darken(channel: u32) -> u32 {
    if channel > 100 { channel - 20 } else { 0 }
}

fn cube_index(channel: u32) -> u32 {
    let steps = MIDPOINTS.iter().filter(|&&m| m < channel).count();
    u32::try_from(steps).unwrap_or(5)
}
