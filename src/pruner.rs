use std::collections::BTreeSet;

use strum::{Display, EnumString};

use crate::document::{Document, Element, NodePath};

/// Faces of this type are the only ones whose conditions get pruned.
pub const VELOCITY_FACE_TYPE: &str = "Velocity";

/// Momentum and velocity components a zero boundary value is redundant for.
#[derive(Debug, Clone, Copy, Eq, PartialEq, EnumString, Display)]
pub enum VelocityLabel {
    #[strum(serialize = "x-mom")]
    XMomentum,
    #[strum(serialize = "y-mom")]
    YMomentum,
    #[strum(serialize = "z-mom")]
    ZMomentum,
    #[strum(serialize = "u")]
    U,
    #[strum(serialize = "v")]
    V,
    #[strum(serialize = "w")]
    W,
}

/// The `value` attribute of a `BCType`, read as a number.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoundaryValue {
    Number(f64),
    Unparseable,
}

impl BoundaryValue {
    pub fn parse(raw: &str) -> Self {
        raw.trim()
            .parse::<f64>()
            .map_or(Self::Unparseable, Self::Number)
    }

    /// Exact comparison; zero boundary values are written literally as `0` or `0.0`.
    pub fn is_zero(self) -> bool {
        matches!(self, Self::Number(number) if number == 0.0)
    }
}

/// Whether a pruned document should be written back.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum WriteDecision {
    /// No `Grid/BoundaryConditions`; the document was not touched.
    Skip,
    Write { removed: usize },
}

pub fn should_remove(label: &str, value: BoundaryValue) -> bool {
    label.parse::<VelocityLabel>().is_ok() && value.is_zero()
}

/// Remove every zero-valued momentum/velocity `BCType` below a `Velocity` face.
///
/// Documents without a `Grid/BoundaryConditions` section are left untouched and reported as
/// [`WriteDecision::Skip`]. Otherwise all faces in the document are considered, wherever
/// they sit, and the entries to drop are collected before any of them is detached.
pub fn prune(document: &mut Document) -> WriteDecision {
    if !has_boundary_conditions(document.root()) {
        log::debug!("no Grid/BoundaryConditions section");
        return WriteDecision::Skip;
    }

    let targets = removal_targets(document.root());

    // reverse document order keeps the remaining paths valid
    for path in targets.iter().rev() {
        document.root_mut().remove_at(path);
    }

    WriteDecision::Write {
        removed: targets.len(),
    }
}

fn has_boundary_conditions(root: &Element) -> bool {
    root.child("Grid")
        .and_then(|grid| grid.child("BoundaryConditions"))
        .is_some()
}

fn removal_targets(root: &Element) -> BTreeSet<NodePath> {
    let mut targets = BTreeSet::new();

    for (face_path, face) in root.descendants() {
        if face.name() != "Face" {
            continue;
        }

        let Some(face_type) = face.attribute("type") else {
            log::trace!("skipping Face without a type");
            continue;
        };

        if face_type != VELOCITY_FACE_TYPE {
            log::trace!("skipping {face_type} Face");
            continue;
        }

        for (entry_path, entry) in face.descendants() {
            if entry.name() == "BCType" && is_redundant(entry) {
                targets.insert(face_path.iter().chain(&entry_path).copied().collect());
            }
        }
    }

    targets
}

fn is_redundant(entry: &Element) -> bool {
    let (Some(label), Some(raw_value)) = (entry.attribute("label"), entry.attribute("value"))
    else {
        log::debug!("BCType without label or value, keeping it");
        return false;
    };

    let value = BoundaryValue::parse(raw_value);
    if value == BoundaryValue::Unparseable {
        log::warn!("BCType {label} has non-numeric value {raw_value:?}, keeping it");
    }

    should_remove(label, value)
}
