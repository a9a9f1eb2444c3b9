//! Type-tagged identifier generation.
//!
//! An identifier is one kind-prefix character followed by 26 characters of
//! base32 (alphabet `ybndrfg8ejkmcpqxot1uwisza345h769`) encoding 128 random
//! bits. Generation never touches the database.

use serde::Serialize;

/// Base32 alphabet for identifier bodies.
const ALPHABET: &[u8; 32] = b"ybndrfg8ejkmcpqxot1uwisza345h769";

/// Length of the encoded body (128 bits in 5-bit symbols).
pub const BODY_LEN: usize = 26;

/// Total identifier length, prefix included.
pub const IDENTIFIER_LEN: usize = BODY_LEN + 1;

/// Entity kind that selects the identifier prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdKind {
    /// No specific kind.
    None,
    Team,
    Board,
    Card,
    View,
    Session,
    User,
    Token,
    /// Content blocks (text, comments, images, ...).
    Block,
}

impl IdKind {
    /// All kinds, in prefix table order.
    pub const ALL: [IdKind; 9] = [
        IdKind::None,
        IdKind::Team,
        IdKind::Board,
        IdKind::Card,
        IdKind::View,
        IdKind::Session,
        IdKind::User,
        IdKind::Token,
        IdKind::Block,
    ];

    /// Prefix character written in front of the identifier body.
    pub fn prefix(self) -> char {
        match self {
            IdKind::None => '7',
            IdKind::Team => 't',
            IdKind::Board => 'b',
            IdKind::Card => 'c',
            IdKind::View => 'v',
            IdKind::Session => 's',
            IdKind::User => 'u',
            IdKind::Token => 'k',
            IdKind::Block => 'a',
        }
    }

    /// Kind for a prefix character.
    pub fn from_prefix(prefix: char) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.prefix() == prefix)
    }

    /// Kind for a block `type` tag. Unknown or missing types map to `None`.
    pub fn from_block_type(block_type: Option<&str>) -> Self {
        match block_type {
            Some("board") => IdKind::Board,
            Some("card") => IdKind::Card,
            Some("view") => IdKind::View,
            Some("text" | "checkbox" | "comment" | "divider" | "image" | "h1" | "h2" | "h3") => {
                IdKind::Block
            }
            _ => IdKind::None,
        }
    }

    /// Parse the kind of a well-formed identifier.
    ///
    /// Returns `None` for legacy identifiers (wrong length, unknown prefix, or
    /// characters outside the alphabet).
    pub fn of_identifier(id: &str) -> Option<Self> {
        if id.len() != IDENTIFIER_LEN {
            return None;
        }
        let mut chars = id.chars();
        let kind = chars.next().and_then(Self::from_prefix)?;
        if chars.all(|c| c.is_ascii() && ALPHABET.contains(&(c as u8))) {
            Some(kind)
        } else {
            None
        }
    }
}

impl std::fmt::Display for IdKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdKind::None => write!(f, "none"),
            IdKind::Team => write!(f, "team"),
            IdKind::Board => write!(f, "board"),
            IdKind::Card => write!(f, "card"),
            IdKind::View => write!(f, "view"),
            IdKind::Session => write!(f, "session"),
            IdKind::User => write!(f, "user"),
            IdKind::Token => write!(f, "token"),
            IdKind::Block => write!(f, "block"),
        }
    }
}

/// Source of fresh identifiers.
pub trait IdentifierGenerator {
    /// Produce a new identifier tagged with `kind`.
    fn new_identifier(&mut self, kind: IdKind) -> String;
}

/// Generator backed by random (v4) UUIDs.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIdentifiers;

impl IdentifierGenerator for RandomIdentifiers {
    fn new_identifier(&mut self, kind: IdKind) -> String {
        new_identifier(kind)
    }
}

/// Generate a new random identifier tagged with `kind`.
pub fn new_identifier(kind: IdKind) -> String {
    let uuid = uuid::Uuid::new_v4();
    let mut id = String::with_capacity(IDENTIFIER_LEN);
    id.push(kind.prefix());
    id.push_str(&encode_base32(uuid.as_bytes()));
    id
}

fn encode_base32(bytes: &[u8]) -> String {
    let mut out = String::with_capacity((bytes.len() * 8 + 4) / 5);
    let mut buffer: u32 = 0;
    let mut bits = 0u32;

    for &byte in bytes {
        buffer = (buffer << 8) | u32::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(ALPHABET[((buffer >> bits) & 0x1f) as usize] as char);
        }
        buffer &= (1 << bits) - 1;
    }

    if bits > 0 {
        out.push(ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize] as char);
    }

    out
}
