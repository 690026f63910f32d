//! Controller feedback frame packing (spec §4.11): periodic state snapshots
//! and discrete button-press/-release events sent back to the host.

use retrocast_common::model::ControllerState;

const PS4_FRAME_LEN: usize = 25;
const PS5_FRAME_LEN: usize = 28;
const MOTION_PRELUDE_LEN: usize = 17;
const STICK_OFFSET: usize = MOTION_PRELUDE_LEN;

/// Button IDs at/above this value are offset by +32 when reported pressed
/// (spec §4.11) — a quirk of the host's button-id numbering space.
const HIGH_BUTTON_ID_THRESHOLD: u8 = 0x8C;
const HIGH_BUTTON_ID_PRESSED_OFFSET: u8 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerKind {
    Ps4,
    Ps5,
}

/// Packs a full controller-state snapshot. The first 17 bytes are a
/// motion-idle prelude (buttons/triggers packed into its leading bytes,
/// the rest zero — the host doesn't surface a motion-capable controller
/// through this path); the 4 stick axes follow as big-endian `i16`s at
/// offsets 17/19/21/23. PS5 appends 3 bytes with byte 27 set to mark DS4
/// compatibility mode.
pub fn format_state(state: &ControllerState, kind: ControllerKind) -> Vec<u8> {
    let len = match kind {
        ControllerKind::Ps4 => PS4_FRAME_LEN,
        ControllerKind::Ps5 => PS5_FRAME_LEN,
    };
    let mut frame = vec![0u8; len];

    frame[0..4].copy_from_slice(&state.buttons.bits().to_be_bytes());
    frame[4] = state.left_trigger;
    frame[5] = state.right_trigger;

    frame[STICK_OFFSET..STICK_OFFSET + 2].copy_from_slice(&state.left_stick.0.to_be_bytes());
    frame[STICK_OFFSET + 2..STICK_OFFSET + 4].copy_from_slice(&state.left_stick.1.to_be_bytes());
    frame[STICK_OFFSET + 4..STICK_OFFSET + 6].copy_from_slice(&state.right_stick.0.to_be_bytes());
    frame[STICK_OFFSET + 6..STICK_OFFSET + 8].copy_from_slice(&state.right_stick.1.to_be_bytes());

    if kind == ControllerKind::Ps5 {
        frame[27] = 0x01;
    }

    frame
}

/// Packs a single button press/release into the wire's 3-byte event form.
pub fn format_button_event(button_id: u8, pressed: bool) -> [u8; 3] {
    let reported_id = if pressed && button_id >= HIGH_BUTTON_ID_THRESHOLD {
        button_id.wrapping_add(HIGH_BUTTON_ID_PRESSED_OFFSET)
    } else {
        button_id
    };
    [0x80, reported_id, if pressed { 0xFF } else { 0x00 }]
}
