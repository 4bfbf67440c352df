//! Declarations supplied by the manifest parser
//!
//! These are plain data: the registry turns them into store objects when a
//! module is added. They deserialize from JSON or TOML so fixtures and tools
//! can describe modules without a manifest parser.

use super::BundleId;
use serde::{Deserialize, Serialize};

/// Identity of a module as supplied by the module lifecycle system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub id: BundleId,
    pub symbolic_name: String,
    /// Symbolic name of the host when this module is a fragment
    #[serde(default)]
    pub host: Option<String>,
}

impl ModuleDescriptor {
    pub fn new(id: BundleId, symbolic_name: impl Into<String>) -> Self {
        ModuleDescriptor {
            id,
            symbolic_name: symbolic_name.into(),
            host: None,
        }
    }

    pub fn fragment_of(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Namespace of everything this module contributes
    ///
    /// Fragments contribute into their host's namespace.
    pub fn namespace(&self) -> &str {
        self.host.as_deref().unwrap_or(&self.symbolic_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionPointDecl {
    pub simple_id: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
}

impl ExtensionPointDecl {
    pub fn new(simple_id: impl Into<String>) -> Self {
        ExtensionPointDecl {
            simple_id: simple_id.into(),
            label: None,
            schema: None,
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionDecl {
    #[serde(default)]
    pub simple_id: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    /// Target point; an identifier without a dot is relative to the
    /// contributing namespace
    pub point: String,
    #[serde(default)]
    pub elements: Vec<ElementDecl>,
}

impl ExtensionDecl {
    pub fn new(point: impl Into<String>) -> Self {
        ExtensionDecl {
            simple_id: None,
            label: None,
            point: point.into(),
            elements: Vec::new(),
        }
    }

    pub fn id(mut self, simple_id: impl Into<String>) -> Self {
        self.simple_id = Some(simple_id.into());
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn element(mut self, element: ElementDecl) -> Self {
        self.elements.push(element);
        self
    }

    pub fn qualified_point(&self, namespace: &str) -> String {
        if self.point.contains('.') {
            self.point.clone()
        } else {
            format!("{}.{}", namespace, self.point)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementDecl {
    pub name: String,
    #[serde(default)]
    pub attributes: Vec<(String, String)>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub children: Vec<ElementDecl>,
}

impl ElementDecl {
    pub fn new(name: impl Into<String>) -> Self {
        ElementDecl {
            name: name.into(),
            attributes: Vec::new(),
            value: None,
            children: Vec::new(),
        }
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn child(mut self, child: ElementDecl) -> Self {
        self.children.push(child);
        self
    }
}

/// Everything one module declares
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributionDecl {
    pub module: ModuleDescriptor,
    #[serde(default)]
    pub extension_points: Vec<ExtensionPointDecl>,
    #[serde(default)]
    pub extensions: Vec<ExtensionDecl>,
}

impl ContributionDecl {
    pub fn new(module: ModuleDescriptor) -> Self {
        ContributionDecl {
            module,
            extension_points: Vec::new(),
            extensions: Vec::new(),
        }
    }

    pub fn extension_point(mut self, point: ExtensionPointDecl) -> Self {
        self.extension_points.push(point);
        self
    }

    pub fn extension(mut self, extension: ExtensionDecl) -> Self {
        self.extensions.push(extension);
        self
    }
}
