use shared::domain::{Handle, PeerId};

const ADJECTIVES: &[&str] = &[
    "brave", "calm", "eager", "fancy", "gentle", "happy", "jolly", "keen", "lively", "mighty",
    "nimble", "proud", "quiet", "rapid", "silly", "tidy", "vivid", "witty", "zany", "bold",
];

const COLORS: &[&str] = &[
    "amber", "azure", "coral", "crimson", "cyan", "gold", "indigo", "ivory", "jade", "lime",
    "magenta", "olive", "orange", "plum", "rose", "ruby", "silver", "teal", "violet", "white",
];

const ANIMALS: &[&str] = &[
    "badger", "beaver", "camel", "crane", "dolphin", "falcon", "ferret", "gecko", "heron", "koala",
    "lemur", "lynx", "marmot", "otter", "panda", "puffin", "raven", "seal", "tiger", "walrus",
];

// FNV-1a; stable across platforms and releases.
fn fingerprint(input: &str) -> u64 {
    input.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
    })
}

fn pick(words: &[&'static str], seed: u64) -> &'static str {
    // word lists are small constants, so the index always fits
    words[(seed % words.len() as u64) as usize]
}

/// Derives a readable `adjective-color-animal` handle from a peer id. The
/// same id always yields the same handle.
pub fn handle_for(peer_id: &PeerId) -> Handle {
    let seed = fingerprint(peer_id.as_str());
    Handle::new(format!(
        "{}-{}-{}",
        pick(ADJECTIVES, seed),
        pick(COLORS, seed >> 21),
        pick(ANIMALS, seed >> 42),
    ))
}
