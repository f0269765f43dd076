use std::sync::OnceLock;

use crate::error::{ScanError, ScanResult};

/// Tags for the C/C++ punctuation set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PunctId {
    #[default]
    None, // no punctuation
    Assign,       // =
    Add,          // +
    Sub,          // -
    Mul,          // *
    Div,          // /
    Mod,          // %
    Shr,          // >>
    Shl,          // <<
    AddAssign,    // +=
    SubAssign,    // -=
    MulAssign,    // *=
    DivAssign,    // /=
    ModAssign,    // %=
    ShrAssign,    // >>=
    ShlAssign,    // <<=
    LogicAnd,     // &&
    LogicOr,      // ||
    LogicNot,     // !
    LogicEq,      // ==
    LogicNotEq,   // !=
    Greater,      // >
    Less,         // <
    GreaterEq,    // >=
    LessEq,       // <=
    Inc,          // ++
    Dec,          // --
    BitAnd,       // &
    BitOr,        // |
    BitXor,       // ^
    BitNot,       // ~
    BitAndAssign, // &=
    BitOrAssign,  // |=
    BitXorAssign, // ^=
    Dot,          // .
    Arrow,        // ->
    ColonColon,   // ::
    DotStar,      // .*
    Comma,        // ,
    Semicolon,    // ;
    Colon,        // :
    Question,     // ?
    Ellipsis,     // ...
    Backslash,    // \
    OpenParen,    // (
    CloseParen,   // )
    OpenBracket,  // [
    CloseBracket, // ]
    OpenBrace,    // {
    CloseBrace,   // }
    Hash,         // #
    HashHash,     // ##
    Dollar,       // $
}

/// Pair of a punctuation string and its id tag. The entry at index 0 must be
/// the `PunctId::None` sentinel with empty text; for every other entry the id
/// enumerator value matches the entry index.
#[derive(Clone, Copy, Debug)]
pub struct PunctDef {
    pub text: &'static str,
    pub id: PunctId,
}

/// Longest-first punctuation lookup.
///
/// `heads` maps the first byte of a punctuation to the head of a chain of
/// candidate entries, linked through `next`, ordered so that longer
/// punctuations come first. Scanning walks the chain and takes the first
/// candidate that prefixes the input, which is therefore the longest match.
pub struct PunctTable {
    defs: Vec<PunctDef>,
    heads: [i16; 256],
    next: Vec<i16>,
}

impl PunctTable {
    pub fn new(defs: &[PunctDef]) -> ScanResult<Self> {
        let mut heads = [-1i16; 256];
        let mut next = vec![-1i16; defs.len()];

        for (i, def) in defs.iter().enumerate() {
            if def.id == PunctId::None {
                continue;
            }
            if def.text.is_empty() {
                return Err(ScanError::new(
                    format!("empty punctuation text for id {:?}", def.id),
                    true,
                ));
            }

            // Insert before the first chain entry that is shorter, so each
            // chain stays sorted longest-first. Ties keep definition order.
            let first = def.text.as_bytes()[0] as usize;
            let mut last: i32 = -1;
            let mut n = heads[first] as i32;
            let mut placed = false;
            while n >= 0 {
                if defs[n as usize].text.len() < def.text.len() {
                    next[i] = n as i16;
                    if last >= 0 {
                        next[last as usize] = i as i16;
                    } else {
                        heads[first] = i as i16;
                    }
                    placed = true;
                    break;
                }
                last = n;
                n = next[n as usize] as i32;
            }
            if !placed {
                next[i] = -1;
                if last >= 0 {
                    next[last as usize] = i as i16;
                } else {
                    heads[first] = i as i16;
                }
            }
        }

        Ok(Self {
            defs: defs.to_vec(),
            heads,
            next,
        })
    }

    /// The default C/C++ punctuation set, built once per process.
    pub fn default_table() -> &'static PunctTable {
        static TABLE: OnceLock<PunctTable> = OnceLock::new();
        TABLE.get_or_init(|| {
            PunctTable::new(DEFAULT_PUNCTUATIONS).expect("default punctuation set is well formed")
        })
    }

    /// Longest punctuation that prefixes `input`, if any.
    pub fn match_longest(&self, input: &str) -> Option<&PunctDef> {
        let first = *input.as_bytes().first()?;
        let mut n = self.heads[first as usize];
        while n >= 0 {
            let def = &self.defs[n as usize];
            if input.starts_with(def.text) {
                return Some(def);
            }
            n = self.next[n as usize];
        }
        None
    }

    pub fn text_of(&self, id: PunctId) -> &str {
        let index = id as usize;
        if id != PunctId::None && index < self.defs.len() && self.defs[index].id == id {
            self.defs[index].text
        } else {
            "(unknown punctuation)"
        }
    }

    pub fn id_of(&self, text: &str) -> PunctId {
        for def in &self.defs {
            if def.id != PunctId::None && def.text == text {
                return def.id;
            }
        }
        PunctId::None
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

/// The default C/C++ punctuation set. One entry per `PunctId` enumerator.
pub const DEFAULT_PUNCTUATIONS: &[PunctDef] = &[
    PunctDef { text: "", id: PunctId::None },
    PunctDef { text: "=", id: PunctId::Assign },
    PunctDef { text: "+", id: PunctId::Add },
    PunctDef { text: "-", id: PunctId::Sub },
    PunctDef { text: "*", id: PunctId::Mul },
    PunctDef { text: "/", id: PunctId::Div },
    PunctDef { text: "%", id: PunctId::Mod },
    PunctDef { text: ">>", id: PunctId::Shr },
    PunctDef { text: "<<", id: PunctId::Shl },
    PunctDef { text: "+=", id: PunctId::AddAssign },
    PunctDef { text: "-=", id: PunctId::SubAssign },
    PunctDef { text: "*=", id: PunctId::MulAssign },
    PunctDef { text: "/=", id: PunctId::DivAssign },
    PunctDef { text: "%=", id: PunctId::ModAssign },
    PunctDef { text: ">>=", id: PunctId::ShrAssign },
    PunctDef { text: "<<=", id: PunctId::ShlAssign },
    PunctDef { text: "&&", id: PunctId::LogicAnd },
    PunctDef { text: "||", id: PunctId::LogicOr },
    PunctDef { text: "!", id: PunctId::LogicNot },
    PunctDef { text: "==", id: PunctId::LogicEq },
    PunctDef { text: "!=", id: PunctId::LogicNotEq },
    PunctDef { text: ">", id: PunctId::Greater },
    PunctDef { text: "<", id: PunctId::Less },
    PunctDef { text: ">=", id: PunctId::GreaterEq },
    PunctDef { text: "<=", id: PunctId::LessEq },
    PunctDef { text: "++", id: PunctId::Inc },
    PunctDef { text: "--", id: PunctId::Dec },
    PunctDef { text: "&", id: PunctId::BitAnd },
    PunctDef { text: "|", id: PunctId::BitOr },
    PunctDef { text: "^", id: PunctId::BitXor },
    PunctDef { text: "~", id: PunctId::BitNot },
    PunctDef { text: "&=", id: PunctId::BitAndAssign },
    PunctDef { text: "|=", id: PunctId::BitOrAssign },
    PunctDef { text: "^=", id: PunctId::BitXorAssign },
    PunctDef { text: ".", id: PunctId::Dot },
    PunctDef { text: "->", id: PunctId::Arrow },
    PunctDef { text: "::", id: PunctId::ColonColon },
    PunctDef { text: ".*", id: PunctId::DotStar },
    PunctDef { text: ",", id: PunctId::Comma },
    PunctDef { text: ";", id: PunctId::Semicolon },
    PunctDef { text: ":", id: PunctId::Colon },
    PunctDef { text: "?", id: PunctId::Question },
    PunctDef { text: "...", id: PunctId::Ellipsis },
    PunctDef { text: "\\", id: PunctId::Backslash },
    PunctDef { text: "(", id: PunctId::OpenParen },
    PunctDef { text: ")", id: PunctId::CloseParen },
    PunctDef { text: "[", id: PunctId::OpenBracket },
    PunctDef { text: "]", id: PunctId::CloseBracket },
    PunctDef { text: "{", id: PunctId::OpenBrace },
    PunctDef { text: "}", id: PunctId::CloseBrace },
    PunctDef { text: "#", id: PunctId::Hash },
    PunctDef { text: "##", id: PunctId::HashHash },
    PunctDef { text: "$", id: PunctId::Dollar },
];
