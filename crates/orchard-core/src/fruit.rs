//! Display attributes for each importance level. A task is drawn as a fruit
//! whose size and colour grow with its importance.

use crate::task::Importance;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fruit {
    pub importance: Importance,
    pub radius: f64,
    pub color: &'static str,
}

pub const FRUITS: [Fruit; 4] = [
    Fruit {
        importance: Importance::None,
        radius: 25.0,
        color: "#90A4AE",
    },
    Fruit {
        importance: Importance::General,
        radius: 42.5,
        color: "#43A047",
    },
    Fruit {
        importance: Importance::Important,
        radius: 70.0,
        color: "#FB8C00",
    },
    Fruit {
        importance: Importance::VeryImportant,
        radius: 90.0,
        color: "#E53935",
    },
];

impl Fruit {
    pub fn label(&self) -> &'static str {
        self.importance.label()
    }

    /// `(r, g, b)` of the `#RRGGBB` colour.
    pub fn rgb(&self) -> (u8, u8, u8) {
        let hex = self.color.trim_start_matches('#');
        let channel = |range: std::ops::Range<usize>| {
            hex.get(range)
                .and_then(|part| u8::from_str_radix(part, 16).ok())
                .unwrap_or(0)
        };
        (channel(0..2), channel(2..4), channel(4..6))
    }
}

pub fn fruit_for(importance: Importance) -> &'static Fruit {
    match importance {
        Importance::None => &FRUITS[0],
        Importance::General => &FRUITS[1],
        Importance::Important => &FRUITS[2],
        Importance::VeryImportant => &FRUITS[3],
    }
}

/// Exact-match lookup on the stored label. There is no fallback entry.
pub fn fruit_for_label(label: &str) -> Option<&'static Fruit> {
    FRUITS.iter().find(|fruit| fruit.label() == label)
}
