//! Frame flag bits.
//!
//! Every frame carries one document. The flags say whether it is a metadata
//! document (headers, heartbeats) or a payload document, and which wire it
//! was written with.

/// The document is metadata rather than application payload.
pub const METADATA: u16 = 0x0001;

/// The document is text wire; binary wire otherwise.
pub const TEXT_WIRE: u16 = 0x0002;

/// Every flag bit this version understands.
pub const KNOWN_FLAGS: u16 = METADATA | TEXT_WIRE;

/// Which side of the metadata/payload split a document sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    Data,
    Metadata,
}

impl DocumentKind {
    pub fn from_flags(flags: u16) -> Self {
        if flags & METADATA != 0 {
            DocumentKind::Metadata
        } else {
            DocumentKind::Data
        }
    }

    pub fn flag(self) -> u16 {
        match self {
            DocumentKind::Data => 0,
            DocumentKind::Metadata => METADATA,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DocumentKind::Data => "data",
            DocumentKind::Metadata => "metadata",
        }
    }
}

/// Compose frame flags for a document.
pub fn flags(kind: DocumentKind, text: bool) -> u16 {
    kind.flag() | if text { TEXT_WIRE } else { 0 }
}

/// Returns true if the flags mark a text wire document.
pub fn is_text(flags: u16) -> bool {
    flags & TEXT_WIRE != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_flags() {
        assert_eq!(flags(DocumentKind::Data, false), 0);
        assert_eq!(flags(DocumentKind::Metadata, true), METADATA | TEXT_WIRE);
        assert_eq!(DocumentKind::from_flags(METADATA | TEXT_WIRE), DocumentKind::Metadata);
        assert_eq!(DocumentKind::from_flags(TEXT_WIRE), DocumentKind::Data);
        assert!(is_text(TEXT_WIRE));
        assert!(!is_text(METADATA));
        assert_eq!(DocumentKind::Metadata.name(), "metadata");
    }
}
