//! Built-in planning tools and their storage declarations

use crate::keys::{resolve_keys, ResolvedKeys};
use crate::types::{Identity, StorageKeySpec, ToolId};
use serde::{Deserialize, Serialize};

/// A tool view and the local keys it persists to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Stable tool id; also the remote document name
    pub id: ToolId,
    /// Human-readable title
    pub title: String,
    /// Storage key declarations in page order
    #[serde(default)]
    pub keys: Vec<StorageKeySpec>,
}

impl ToolDescriptor {
    /// Create descriptor
    #[must_use]
    pub fn new(id: impl Into<ToolId>, title: impl Into<String>, keys: Vec<StorageKeySpec>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            keys,
        }
    }

    /// Whether the tool has anything to synchronize
    #[inline]
    #[must_use]
    pub fn syncs(&self) -> bool {
        !self.keys.is_empty()
    }

    /// Concrete keys for `identity`; `None` when a guest meets a
    /// per-identity declaration
    #[must_use]
    pub fn resolve(&self, identity: Option<&Identity>) -> Option<ResolvedKeys> {
        resolve_keys(&self.keys, identity)
    }
}

/// Ordered set of tool descriptors
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCatalog {
    tools: Vec<ToolDescriptor>,
}

impl ToolCatalog {
    /// Catalog from explicit descriptors
    #[must_use]
    pub fn new(tools: Vec<ToolDescriptor>) -> Self {
        Self { tools }
    }

    /// The tools shipped with the application
    #[must_use]
    pub fn builtin() -> Self {
        use StorageKeySpec as K;
        Self::new(vec![
            ToolDescriptor::new(
                "strategic_planning",
                "Strategic Planning",
                vec![
                    K::global("prototype_strategicPlan"),
                    K::global("goalSetting_savedGoals"),
                ],
            ),
            ToolDescriptor::new(
                "financial_report",
                "Financial Report",
                vec![K::global("financialReportData")],
            ),
            ToolDescriptor::new(
                "porters_five_forces",
                "Porter's Five Forces",
                vec![K::per_identity("portersFiveForcesData_")],
            ),
            ToolDescriptor::new(
                "strategic_action_plan",
                "Strategic Action Plan",
                vec![
                    K::per_identity("strategicActionPlanData_"),
                    K::per_identity("goalSetting_savedGoals_"),
                ],
            ),
            ToolDescriptor::new(
                "goal_setting_template",
                "Goal Setting Template",
                vec![
                    K::per_identity("goalSettingTemplateData_"),
                    K::per_identity("goalSetting_savedGoals_"),
                ],
            ),
            ToolDescriptor::new(
                "strategic_canvas",
                "Strategic Canvas",
                vec![K::per_identity("strategicCanvasData_")],
            ),
            ToolDescriptor::new(
                "contingency_plan",
                "Contingency Plan",
                vec![
                    K::per_identity("contingencyCategoryData_"),
                    K::per_identity("contingencyPlanData_"),
                    K::per_identity("contingencyPlanMetadata_"),
                ],
            ),
            ToolDescriptor::new(
                "product_canvas",
                "Product Canvas",
                vec![K::per_identity("productCanvasData_")],
            ),
            ToolDescriptor::new("home", "Home", Vec::new()),
        ])
    }

    /// Look up a tool by id
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.id.as_str() == id)
    }

    /// Tools in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.iter()
    }

    /// Number of tools
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the catalog is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl<'a> IntoIterator for &'a ToolCatalog {
    type Item = &'a ToolDescriptor;
    type IntoIter = std::slice::Iter<'a, ToolDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.tools.iter()
    }
}
