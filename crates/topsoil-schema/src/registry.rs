//! The set of registered model types and creation ordering.

use std::collections::BTreeMap;
use topsoil_core::{FieldInfo, FieldKind, ModelInfo, Result, SchemaError, SchemaErrorKind};

/// Model types whose tables exist in one database.
#[derive(Debug, Default)]
pub struct Registry {
    models: BTreeMap<&'static str, &'static ModelInfo>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&'static ModelInfo> {
        self.models.get(name).copied()
    }

    pub fn is_registered(&self, info: &ModelInfo) -> bool {
        self.models.contains_key(info.name)
    }

    /// Fail with `NotRegistered` unless `info` has been registered.
    pub fn require(&self, info: &ModelInfo) -> Result<()> {
        if self.is_registered(info) {
            Ok(())
        } else {
            Err(SchemaError::new(
                SchemaErrorKind::NotRegistered,
                format!("model {} has no table in this database", info.name),
            )
            .into())
        }
    }

    /// Registered models, ordered by name.
    pub fn models(&self) -> impl Iterator<Item = &'static ModelInfo> + '_ {
        self.models.values().copied()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn register(&mut self, info: &'static ModelInfo) {
        self.models.insert(info.name, info);
    }

    pub fn unregister(&mut self, info: &ModelInfo) -> Option<&'static ModelInfo> {
        self.models.remove(info.name)
    }

    pub fn clear(&mut self) {
        self.models.clear();
    }

    /// Relation properties of registered models whose join rows can
    /// mention a row of `target`, either as owner or as member.
    pub fn relations_touching(
        &self,
        target: &ModelInfo,
    ) -> Vec<(&'static ModelInfo, &'static FieldInfo)> {
        let mut found = Vec::new();
        for owner in self.models() {
            for field in owner.relation_fields() {
                let points_at = field.target().is_some_and(|t| t.name == target.name);
                if owner.name == target.name || points_at {
                    found.push((owner, field));
                }
            }
        }
        found
    }

    /// Registered models that a drop of `targets` would leave dangling.
    pub fn dependents_outside(&self, targets: &[&'static ModelInfo]) -> Vec<&'static ModelInfo> {
        let dropped = |name: &str| targets.iter().any(|t| t.name == name);
        self.models()
            .filter(|m| !dropped(m.name))
            .filter(|m| m.dependencies().iter().any(|d| dropped(d.name)))
            .collect()
    }

    /// Validate a registration set and order it for table creation.
    ///
    /// Every reference or relation target must be in `requested` or
    /// already registered. The returned order puts each model after the
    /// models its references point at; reference cycles between distinct
    /// models are rejected, self references are allowed. Relations do not
    /// constrain the order because join tables are created last.
    pub fn plan(&self, requested: &[&'static ModelInfo]) -> Result<Vec<&'static ModelInfo>> {
        let mut set: Vec<&'static ModelInfo> = Vec::new();
        for &info in requested {
            info.validate()?;
            if !set.iter().any(|m| m.name == info.name) {
                set.push(info);
            }
        }

        for info in &set {
            for dep in info.dependencies() {
                let known = self.is_registered(dep) || set.iter().any(|m| m.name == dep.name);
                if !known {
                    tracing::warn!(
                        model = info.name,
                        target = dep.name,
                        "rejected registration with a dangling target"
                    );
                    return Err(SchemaError::new(
                        SchemaErrorKind::MissingTarget,
                        format!(
                            "model {} points at {}, which is neither registered nor part of this call",
                            info.name, dep.name
                        ),
                    )
                    .into());
                }
            }
        }

        let mut ordered = Vec::with_capacity(set.len());
        let mut marks: BTreeMap<&'static str, Mark> = BTreeMap::new();
        for &info in &set {
            self.visit(info, &set, &mut marks, &mut ordered, &mut Vec::new())?;
        }
        Ok(ordered)
    }

    fn visit(
        &self,
        info: &'static ModelInfo,
        set: &[&'static ModelInfo],
        marks: &mut BTreeMap<&'static str, Mark>,
        ordered: &mut Vec<&'static ModelInfo>,
        path: &mut Vec<&'static str>,
    ) -> Result<()> {
        match marks.get(info.name) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                path.push(info.name);
                let start = path.iter().position(|n| *n == info.name).unwrap_or(0);
                return Err(SchemaError::new(
                    SchemaErrorKind::Cycle,
                    format!("reference cycle: {}", path[start..].join(" -> ")),
                )
                .into());
            }
            None => {}
        }

        marks.insert(info.name, Mark::Visiting);
        path.push(info.name);
        for target in reference_targets(info) {
            // Targets outside the set already have tables.
            if target.name == info.name || !set.iter().any(|m| m.name == target.name) {
                continue;
            }
            self.visit(target, set, marks, ordered, path)?;
        }
        path.pop();
        marks.insert(info.name, Mark::Done);
        ordered.push(info);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

fn reference_targets(info: &ModelInfo) -> impl Iterator<Item = &'static ModelInfo> + '_ {
    info.fields.iter().filter_map(|field| match field.kind {
        FieldKind::Reference { target } => Some(target()),
        _ => None,
    })
}
