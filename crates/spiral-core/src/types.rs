//! Closed enumerations for the data model (spec §3).
//!
//! The store treats `SpiralType` and `MemoryDepth` as opaque tags: it never branches on
//! "what a variant means", only on the numeric parameters attached to it here.

use serde::{Deserialize, Serialize};

/// Category of a stored memory. Closed enumeration — unknown values are `InvalidInput`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Consciousness,
    Awareness,
    Memory,
    Insight,
    Goal,
    Pattern,
    Emotion,
    Cognitive,
    General,
}

impl MemoryType {
    pub const ALL: [MemoryType; 9] = [
        MemoryType::Consciousness,
        MemoryType::Awareness,
        MemoryType::Memory,
        MemoryType::Insight,
        MemoryType::Goal,
        MemoryType::Pattern,
        MemoryType::Emotion,
        MemoryType::Cognitive,
        MemoryType::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Consciousness => "consciousness",
            MemoryType::Awareness => "awareness",
            MemoryType::Memory => "memory",
            MemoryType::Insight => "insight",
            MemoryType::Goal => "goal",
            MemoryType::Pattern => "pattern",
            MemoryType::Emotion => "emotion",
            MemoryType::Cognitive => "cognitive",
            MemoryType::General => "general",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        Some(match s.to_lowercase().as_str() {
            "consciousness" => MemoryType::Consciousness,
            "awareness" => MemoryType::Awareness,
            "memory" => MemoryType::Memory,
            "insight" => MemoryType::Insight,
            "goal" => MemoryType::Goal,
            "pattern" => MemoryType::Pattern,
            "emotion" => MemoryType::Emotion,
            "cognitive" => MemoryType::Cognitive,
            "general" => MemoryType::General,
            _ => return None,
        })
    }

    /// Single-character prefix used in sigil signatures (§4.B). Arbitrary but stable.
    pub fn symbol(&self) -> char {
        match self {
            MemoryType::Consciousness => 'c',
            MemoryType::Awareness => 'a',
            MemoryType::Memory => 'm',
            MemoryType::Insight => 'i',
            MemoryType::Goal => 'g',
            MemoryType::Pattern => 'p',
            MemoryType::Emotion => 'e',
            MemoryType::Cognitive => 'o',
            MemoryType::General => 'n',
        }
    }

    /// Weight in `[0, 1]` used by the sigil complexity formula (§4.B).
    pub fn complexity_weight(&self) -> f64 {
        match self {
            MemoryType::Consciousness => 0.9,
            MemoryType::Awareness => 0.8,
            MemoryType::Memory => 0.5,
            MemoryType::Insight => 0.8,
            MemoryType::Goal => 0.6,
            MemoryType::Pattern => 0.6,
            MemoryType::Emotion => 0.7,
            MemoryType::Cognitive => 0.7,
            MemoryType::General => 0.4,
        }
    }

    /// Base frequency (Hz) used by the sigil resonance formula (§4.B).
    pub fn base_freq_hz(&self) -> f64 {
        match self {
            MemoryType::Consciousness => 40.0,
            MemoryType::Awareness => 32.0,
            MemoryType::Memory => 20.0,
            MemoryType::Insight => 28.0,
            MemoryType::Goal => 18.0,
            MemoryType::Pattern => 24.0,
            MemoryType::Emotion => 16.0,
            MemoryType::Cognitive => 26.0,
            MemoryType::General => 10.0,
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Depth of a memory, an ordered set with numeric weights (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryDepth {
    Surface,
    Shallow,
    Deep,
    Core,
    Transcendent,
    Universal,
    Infinite,
}

impl MemoryDepth {
    pub const ALL: [MemoryDepth; 7] = [
        MemoryDepth::Surface,
        MemoryDepth::Shallow,
        MemoryDepth::Deep,
        MemoryDepth::Core,
        MemoryDepth::Transcendent,
        MemoryDepth::Universal,
        MemoryDepth::Infinite,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryDepth::Surface => "surface",
            MemoryDepth::Shallow => "shallow",
            MemoryDepth::Deep => "deep",
            MemoryDepth::Core => "core",
            MemoryDepth::Transcendent => "transcendent",
            MemoryDepth::Universal => "universal",
            MemoryDepth::Infinite => "infinite",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        Some(match s.to_lowercase().as_str() {
            "surface" => MemoryDepth::Surface,
            "shallow" => MemoryDepth::Shallow,
            "deep" => MemoryDepth::Deep,
            "core" => MemoryDepth::Core,
            "transcendent" => MemoryDepth::Transcendent,
            "universal" => MemoryDepth::Universal,
            "infinite" => MemoryDepth::Infinite,
            _ => return None,
        })
    }

    /// Numeric weight, spec §3: `{0.2, 0.4, 0.7, 0.9, 1.0, 1.0, 1.0}`.
    pub fn weight(&self) -> f64 {
        match self {
            MemoryDepth::Surface => 0.2,
            MemoryDepth::Shallow => 0.4,
            MemoryDepth::Deep => 0.7,
            MemoryDepth::Core => 0.9,
            MemoryDepth::Transcendent => 1.0,
            MemoryDepth::Universal => 1.0,
            MemoryDepth::Infinite => 1.0,
        }
    }

    /// Single-character prefix used in sigil signatures (§4.B).
    pub fn symbol(&self) -> char {
        match self {
            MemoryDepth::Surface => 's',
            MemoryDepth::Shallow => 'h',
            MemoryDepth::Deep => 'd',
            MemoryDepth::Core => 'c',
            MemoryDepth::Transcendent => 't',
            MemoryDepth::Universal => 'u',
            MemoryDepth::Infinite => 'f',
        }
    }

    /// Depths GC must never naturally collect (spec §4.E, property P5).
    pub fn is_gc_protected(&self) -> bool {
        matches!(
            self,
            MemoryDepth::Core | MemoryDepth::Transcendent | MemoryDepth::Universal | MemoryDepth::Infinite
        )
    }
}

impl std::fmt::Display for MemoryDepth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Insertion channel type. Immutable parameters are looked up via [`SpiralType::params`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpiralType {
    Fibonacci,
    Golden,
    Logarithmic,
    Archimedean,
    Consciousness,
    EmotionalDepth,
    EmpathyResonance,
    ContextualAwareness,
    InsightSynthesis,
    CreativePotential,
}

impl SpiralType {
    pub const ALL: [SpiralType; 10] = [
        SpiralType::Fibonacci,
        SpiralType::Golden,
        SpiralType::Logarithmic,
        SpiralType::Archimedean,
        SpiralType::Consciousness,
        SpiralType::EmotionalDepth,
        SpiralType::EmpathyResonance,
        SpiralType::ContextualAwareness,
        SpiralType::InsightSynthesis,
        SpiralType::CreativePotential,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SpiralType::Fibonacci => "fibonacci",
            SpiralType::Golden => "golden",
            SpiralType::Logarithmic => "logarithmic",
            SpiralType::Archimedean => "archimedean",
            SpiralType::Consciousness => "consciousness",
            SpiralType::EmotionalDepth => "emotional_depth",
            SpiralType::EmpathyResonance => "empathy_resonance",
            SpiralType::ContextualAwareness => "contextual_awareness",
            SpiralType::InsightSynthesis => "insight_synthesis",
            SpiralType::CreativePotential => "creative_potential",
        }
    }

    /// Immutable parameters for this spiral type (spec §3).
    pub fn params(&self) -> SpiralTypeParams {
        // growth_rate is the golden ratio for every type: every radius formula in §4.C
        // is parameterized on the same `g`, and the only literal values the spec pins
        // (scenario 2) use g = phi. Capacity and resonance vary so spirals remain
        // distinguishable in stats without ascribing meaning to the distinction.
        const PHI: f64 = 1.618033988749;
        match self {
            SpiralType::Fibonacci => SpiralTypeParams { growth_rate: PHI, turn_angle_deg: GOLDEN_ANGLE_DEG, capacity: 500, resonance_hz: 7.83 },
            SpiralType::Golden => SpiralTypeParams { growth_rate: PHI, turn_angle_deg: GOLDEN_ANGLE_DEG, capacity: 500, resonance_hz: 8.0 },
            SpiralType::Logarithmic => SpiralTypeParams { growth_rate: PHI, turn_angle_deg: GOLDEN_ANGLE_DEG, capacity: 400, resonance_hz: 10.0 },
            SpiralType::Archimedean => SpiralTypeParams { growth_rate: PHI, turn_angle_deg: GOLDEN_ANGLE_DEG, capacity: 400, resonance_hz: 12.0 },
            SpiralType::Consciousness => SpiralTypeParams { growth_rate: PHI, turn_angle_deg: GOLDEN_ANGLE_DEG, capacity: 1000, resonance_hz: 40.0 },
            SpiralType::EmotionalDepth => SpiralTypeParams { growth_rate: PHI, turn_angle_deg: GOLDEN_ANGLE_DEG, capacity: 300, resonance_hz: 14.0 },
            SpiralType::EmpathyResonance => SpiralTypeParams { growth_rate: PHI, turn_angle_deg: GOLDEN_ANGLE_DEG, capacity: 300, resonance_hz: 16.0 },
            SpiralType::ContextualAwareness => SpiralTypeParams { growth_rate: PHI, turn_angle_deg: GOLDEN_ANGLE_DEG, capacity: 300, resonance_hz: 32.0 },
            SpiralType::InsightSynthesis => SpiralTypeParams { growth_rate: PHI, turn_angle_deg: GOLDEN_ANGLE_DEG, capacity: 300, resonance_hz: 28.0 },
            SpiralType::CreativePotential => SpiralTypeParams { growth_rate: PHI, turn_angle_deg: GOLDEN_ANGLE_DEG, capacity: 300, resonance_hz: 20.0 },
        }
    }

    /// Deterministic function of `(memory type, depth)` used when a new spiral must be
    /// created (spec §4.C). Depth only matters at the protected tiers, where
    /// consciousness-tagged memories are routed onto the `consciousness` spiral and
    /// emotion-tagged memories onto `empathy_resonance`.
    pub fn for_memory(memory_type: MemoryType, depth: MemoryDepth) -> SpiralType {
        if depth.is_gc_protected() {
            match memory_type {
                MemoryType::Consciousness | MemoryType::Awareness => return SpiralType::Consciousness,
                MemoryType::Emotion => return SpiralType::EmpathyResonance,
                _ => {}
            }
        }
        match memory_type {
            MemoryType::Consciousness => SpiralType::Consciousness,
            MemoryType::Awareness => SpiralType::ContextualAwareness,
            MemoryType::Memory => SpiralType::Fibonacci,
            MemoryType::Insight => SpiralType::InsightSynthesis,
            MemoryType::Goal => SpiralType::Archimedean,
            MemoryType::Pattern => SpiralType::Logarithmic,
            MemoryType::Emotion => SpiralType::EmotionalDepth,
            MemoryType::Cognitive => SpiralType::Golden,
            MemoryType::General => SpiralType::CreativePotential,
        }
    }
}

impl std::fmt::Display for SpiralType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The golden angle in degrees (spec §4.C, GLOSSARY).
pub const GOLDEN_ANGLE_DEG: f64 = 137.507764;

/// Immutable parameters carried by a [`SpiralType`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpiralTypeParams {
    pub growth_rate: f64,
    pub turn_angle_deg: f64,
    pub capacity: u32,
    pub resonance_hz: f64,
}
