//! Variant expansion.
//!
//! A [`ClassDescriptor`] declares a test class: its kind, role, the axes it
//! varies over, and a factory producing its behavior. Expansion takes the
//! cross product of the class's axes over a registered [`Universe`] of
//! service types and option classes, in axis declaration order, and yields
//! one [`Variant`] per combination. Expansion is pure: the same descriptor
//! and universe always produce the same variants in the same order.

use crate::errors::ExpansionError;
use crate::node::{sanitize, NodeRole, ServiceType, TestNode};
use crate::template::{self, Scope};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Builds the behavior of a class node for one variant.
pub type NodeFactory = Arc<dyn Fn(&Variant) -> Arc<dyn TestNode> + Send + Sync>;

/// Builds the behavior of an option node for one option instance.
pub type OptionFactory = Arc<dyn Fn(&OptionInstance) -> Arc<dyn TestNode> + Send + Sync>;

/// Label of the default service slot of a mapping class.
pub const TARGET: &str = "target";

/// Name suffix of the variant combining every non-isolated option.
pub const ALL_OPTIONS: &str = "all";

/// One dimension a class varies over.
#[derive(Debug, Clone, PartialEq)]
pub enum Axis {
    /// One variant per registered service type.
    Services,
    /// Bare, each option alone, and all non-isolated options combined.
    Options,
    /// One variant per value, exposed as parameter `param` (e.g. a canary weight).
    Scalar { param: String, values: Vec<Value> },
    /// One variant per labelled definition, exposed as parameter `param`.
    Definitions {
        param: String,
        entries: Vec<(String, Value)>,
    },
}

impl Axis {
    pub fn scalar<I, V>(param: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Axis::Scalar {
            param: param.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn definitions<I, L, V>(param: impl Into<String>, entries: I) -> Self
    where
        I: IntoIterator<Item = (L, V)>,
        L: Into<String>,
        V: Into<Value>,
    {
        Axis::Definitions {
            param: param.into(),
            entries: entries
                .into_iter()
                .map(|(label, value)| (label.into(), value.into()))
                .collect(),
        }
    }

    fn name(&self) -> &str {
        match self {
            Axis::Services => "services",
            Axis::Options => "options",
            Axis::Scalar { param, .. } | Axis::Definitions { param, .. } => param,
        }
    }
}

/// A composable option class, e.g. `cors` or `add_request_headers`.
#[derive(Clone)]
pub struct OptionClass {
    kind: String,
    values: Vec<Value>,
    isolated: bool,
    factory: OptionFactory,
}

impl fmt::Debug for OptionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptionClass")
            .field("kind", &self.kind)
            .field("values", &self.values)
            .field("isolated", &self.isolated)
            .finish_non_exhaustive()
    }
}

impl OptionClass {
    /// Option class with a single, valueless instance.
    pub fn new<F>(kind: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&OptionInstance) -> Arc<dyn TestNode> + Send + Sync + 'static,
    {
        Self {
            kind: kind.into(),
            values: vec![Value::Null],
            isolated: false,
            factory: Arc::new(factory),
        }
    }

    /// One option instance per value.
    pub fn values<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.values = values.into_iter().map(Into::into).collect();
        self
    }

    /// Never combine this option with others.
    pub fn isolated(mut self) -> Self {
        self.isolated = true;
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    fn instances(&self) -> impl Iterator<Item = OptionInstance> + '_ {
        let many = self.values.len() > 1;
        self.values.iter().enumerate().map(move |(index, value)| {
            let name = if many {
                format!("{}-{}", self.kind, index)
            } else {
                self.kind.clone()
            };
            OptionInstance {
                kind: self.kind.clone(),
                index,
                value: value.clone(),
                isolated: self.isolated,
                name,
                factory: Arc::clone(&self.factory),
            }
        })
    }
}

/// One value of an option class, as applied to a variant.
#[derive(Clone)]
pub struct OptionInstance {
    pub(crate) kind: String,
    pub(crate) index: usize,
    pub(crate) value: Value,
    pub(crate) isolated: bool,
    pub(crate) name: String,
    pub(crate) factory: OptionFactory,
}

impl fmt::Debug for OptionInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptionInstance")
            .field("kind", &self.kind)
            .field("index", &self.index)
            .field("value", &self.value)
            .field("isolated", &self.isolated)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl PartialEq for OptionInstance {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.index == other.index
            && self.value == other.value
            && self.isolated == other.isolated
    }
}

impl OptionInstance {
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn is_isolated(&self) -> bool {
        self.isolated
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn behavior(&self) -> Arc<dyn TestNode> {
        (self.factory)(self)
    }
}

/// Registered service types and option classes expansion draws from.
#[derive(Debug, Clone, Default)]
pub struct Universe {
    services: Vec<ServiceType>,
    options: Vec<OptionClass>,
}

impl Universe {
    pub fn builder() -> UniverseBuilder {
        UniverseBuilder::default()
    }

    pub fn services(&self) -> &[ServiceType] {
        &self.services
    }

    pub fn options(&self) -> &[OptionClass] {
        &self.options
    }

    /// Every option instance, in registration order.
    pub fn option_instances(&self) -> Vec<OptionInstance> {
        self.options.iter().flat_map(OptionClass::instances).collect()
    }
}

#[derive(Debug, Default)]
pub struct UniverseBuilder {
    universe: Universe,
}

impl UniverseBuilder {
    pub fn service(mut self, service: ServiceType) -> Self {
        self.universe.services.push(service);
        self
    }

    pub fn option(mut self, option: OptionClass) -> Self {
        self.universe.options.push(option);
        self
    }

    pub fn build(self) -> Universe {
        self.universe
    }
}

/// Options of the "all" variant: non-isolated only, first instance of each
/// option class wins.
pub fn combine_all(instances: &[OptionInstance]) -> Vec<OptionInstance> {
    let mut seen = BTreeSet::new();
    instances
        .iter()
        .filter(|o| !o.isolated)
        .filter(|o| seen.insert(o.kind.clone()))
        .cloned()
        .collect()
}

/// Option sets an options axis expands to, each with its name part: the
/// bare set, every instance alone, then the combined set (when non-empty).
pub fn option_combinations(instances: &[OptionInstance]) -> Vec<(Option<String>, Vec<OptionInstance>)> {
    let mut combinations = vec![(None, Vec::new())];
    combinations.extend(
        instances
            .iter()
            .map(|o| (Some(o.name.clone()), vec![o.clone()])),
    );

    let all = combine_all(instances);
    if !all.is_empty() {
        combinations.push((Some(ALL_OPTIONS.to_string()), all));
    }
    combinations
}

#[derive(Debug, Clone, PartialEq)]
struct ServiceSlot {
    label: String,
    name: Option<String>,
}

/// Declaration of a test class.
#[derive(Clone)]
pub struct ClassDescriptor {
    kind: String,
    role: NodeRole,
    axes: Vec<Axis>,
    name_template: Option<String>,
    services: Vec<ServiceSlot>,
    children: Vec<ClassDescriptor>,
    ambassador_id: Option<String>,
    factory: NodeFactory,
}

impl fmt::Debug for ClassDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDescriptor")
            .field("kind", &self.kind)
            .field("role", &self.role)
            .field("axes", &self.axes)
            .field("name_template", &self.name_template)
            .field("services", &self.services)
            .field("children", &self.children)
            .field("ambassador_id", &self.ambassador_id)
            .finish_non_exhaustive()
    }
}

impl ClassDescriptor {
    fn new<F>(kind: impl Into<String>, role: NodeRole, factory: F) -> Self
    where
        F: Fn(&Variant) -> Arc<dyn TestNode> + Send + Sync + 'static,
    {
        Self {
            kind: kind.into(),
            role,
            axes: Vec::new(),
            name_template: None,
            services: Vec::new(),
            children: Vec::new(),
            ambassador_id: None,
            factory: Arc::new(factory),
        }
    }

    /// Root class owning a gateway. Without axes it yields one variant.
    pub fn gateway<F>(kind: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&Variant) -> Arc<dyn TestNode> + Send + Sync + 'static,
    {
        Self::new(kind, NodeRole::Gateway, factory)
    }

    /// Routing class. Without axes it yields one variant per service type.
    pub fn mapping<F>(kind: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&Variant) -> Arc<dyn TestNode> + Send + Sync + 'static,
    {
        Self::new(kind, NodeRole::Mapping, factory)
    }

    pub fn axis(mut self, axis: Axis) -> Self {
        self.axes.push(axis);
        self
    }

    /// Template for the variant name suffix, e.g. `{self.target.name}-{self.weight}`.
    pub fn name(mut self, template: impl Into<String>) -> Self {
        self.name_template = Some(template.into());
        self
    }

    /// Add a service slot named after the variant's service type.
    pub fn service(mut self, label: impl Into<String>) -> Self {
        self.services.push(ServiceSlot {
            label: label.into(),
            name: None,
        });
        self
    }

    /// Add a service slot with an explicit node name, e.g. a canary.
    pub fn service_named(mut self, label: impl Into<String>, name: impl Into<String>) -> Self {
        self.services.push(ServiceSlot {
            label: label.into(),
            name: Some(name.into()),
        });
        self
    }

    /// Every variant of `child` is attached under every variant of this class.
    pub fn child(mut self, child: ClassDescriptor) -> Self {
        self.children.push(child);
        self
    }

    /// Routing group of this class's nodes and their descendants.
    pub fn ambassador_id(mut self, id: impl Into<String>) -> Self {
        self.ambassador_id = Some(id.into());
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub(crate) fn ambassador_id_override(&self) -> Option<&str> {
        self.ambassador_id.as_deref()
    }

    pub(crate) fn behavior(&self, variant: &Variant) -> Arc<dyn TestNode> {
        (self.factory)(variant)
    }

    fn effective_axes(&self, universe: &Universe) -> Result<Vec<Axis>, ExpansionError> {
        if !self.axes.is_empty() {
            return Ok(self.axes.clone());
        }
        match self.role {
            NodeRole::Mapping if universe.services.is_empty() => Err(ExpansionError::NoAxes {
                class: self.kind.clone(),
            }),
            NodeRole::Mapping => Ok(vec![Axis::Services]),
            _ => Ok(Vec::new()),
        }
    }
}

/// A fully parameterized instance of a test class.
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    kind: String,
    name: String,
    service: Option<ServiceType>,
    services: Vec<(String, ServiceType)>,
    options: Vec<OptionInstance>,
    combination: Option<String>,
    params: BTreeMap<String, Value>,
    labels: BTreeMap<String, String>,
}

impl Variant {
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Generated name; unique among the variants of one class.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Service type chosen on the services axis.
    pub fn service_type(&self) -> Option<&ServiceType> {
        self.service.as_ref()
    }

    /// Service slots as `(label, service)`, in declaration order.
    pub fn services(&self) -> &[(String, ServiceType)] {
        &self.services
    }

    pub fn options(&self) -> &[OptionInstance] {
        &self.options
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    pub fn param_u64(&self, key: &str) -> Option<u64> {
        self.param(key).and_then(Value::as_u64)
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.param(key).and_then(Value::as_str)
    }

    /// Label of a definitions-axis parameter.
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    pub(crate) fn params(&self) -> &BTreeMap<String, Value> {
        &self.params
    }

    pub(crate) fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }
}

impl Scope for Variant {
    fn lookup(&self, segments: &[&str]) -> Option<String> {
        let (first, rest) = segments.split_first()?;

        match (*first, rest) {
            ("kind", []) => Some(self.kind.clone()),
            ("combination", []) => self.combination.clone(),
            ("service", ["name"]) => self.service.as_ref().map(|s| s.name().to_string()),
            ("service", ["kind"]) => self.service.as_ref().map(|s| s.kind().to_string()),
            ("options", [index, field]) => {
                let option = self.options.get(index.parse::<usize>().ok()?)?;
                match *field {
                    "name" => Some(option.name.clone()),
                    "kind" => Some(option.kind.clone()),
                    "value" => Some(template::render_value(&option.value)),
                    _ => None,
                }
            }
            (key, []) => self
                .labels
                .get(key)
                .cloned()
                .or_else(|| self.params.get(key).map(template::render_value)),
            (label, ["name"]) => self
                .services
                .iter()
                .find(|(l, _)| l == label)
                .map(|(_, s)| s.name().to_string()),
            (label, ["kind"]) => self
                .services
                .iter()
                .find(|(l, _)| l == label)
                .map(|(_, s)| s.kind().to_string()),
            _ => None,
        }
    }
}

/// A variant together with its class and the expansions of its children.
#[derive(Debug, Clone)]
pub(crate) struct Expansion {
    pub(crate) variant: Variant,
    pub(crate) class: ClassDescriptor,
    pub(crate) children: Vec<Expansion>,
}

#[derive(Debug, Clone, Default)]
struct Partial {
    service: Option<ServiceType>,
    options: Vec<OptionInstance>,
    combination: Option<String>,
    params: BTreeMap<String, Value>,
    labels: BTreeMap<String, String>,
    parts: Vec<String>,
}

/// Expand one class into its variants.
pub fn expand(class: &ClassDescriptor, universe: &Universe) -> Result<Vec<Variant>, ExpansionError> {
    let mut partials = vec![Partial::default()];

    for axis in class.effective_axes(universe)? {
        let mut next = Vec::new();
        match &axis {
            Axis::Services => {
                if universe.services.is_empty() {
                    return Err(ExpansionError::NoServiceType {
                        class: class.kind.clone(),
                    });
                }
                for partial in &partials {
                    for service in &universe.services {
                        let mut p = partial.clone();
                        p.parts.push(service.name().to_string());
                        p.service = Some(service.clone());
                        next.push(p);
                    }
                }
            }
            Axis::Options => {
                let combinations = option_combinations(&universe.option_instances());
                for partial in &partials {
                    for (part, options) in &combinations {
                        let mut p = partial.clone();
                        p.parts.extend(part.clone());
                        p.combination.clone_from(part);
                        p.options = options.clone();
                        next.push(p);
                    }
                }
            }
            Axis::Scalar { param, values } => {
                if values.is_empty() {
                    return Err(empty_axis(class, &axis));
                }
                for partial in &partials {
                    for value in values {
                        let mut p = partial.clone();
                        p.parts.push(template::render_value(value));
                        p.params.insert(param.clone(), value.clone());
                        next.push(p);
                    }
                }
            }
            Axis::Definitions { param, entries } => {
                if entries.is_empty() {
                    return Err(empty_axis(class, &axis));
                }
                for partial in &partials {
                    for (label, value) in entries {
                        let mut p = partial.clone();
                        p.parts.push(label.clone());
                        p.params.insert(param.clone(), value.clone());
                        p.labels.insert(param.clone(), label.clone());
                        next.push(p);
                    }
                }
            }
        }
        partials = next;
    }

    let mut names = BTreeSet::new();
    let mut variants = Vec::with_capacity(partials.len());
    for partial in partials {
        let variant = finish(class, partial)?;
        if !names.insert(variant.name.clone()) {
            return Err(ExpansionError::DuplicateVariant {
                class: class.kind.clone(),
                name: variant.name,
            });
        }
        variants.push(variant);
    }
    Ok(variants)
}

fn empty_axis(class: &ClassDescriptor, axis: &Axis) -> ExpansionError {
    ExpansionError::EmptyAxis {
        class: class.kind.clone(),
        axis: axis.name().to_string(),
    }
}

fn finish(class: &ClassDescriptor, partial: Partial) -> Result<Variant, ExpansionError> {
    let services = match &partial.service {
        Some(service) if class.services.is_empty() => {
            vec![(TARGET.to_string(), service.clone())]
        }
        Some(service) => class
            .services
            .iter()
            .map(|slot| {
                let named = match &slot.name {
                    Some(name) => service.named(name.clone()),
                    None => service.clone(),
                };
                (slot.label.clone(), named)
            })
            .collect(),
        None if class.services.is_empty() => Vec::new(),
        None => {
            return Err(ExpansionError::NoServiceType {
                class: class.kind.clone(),
            })
        }
    };

    let mut variant = Variant {
        kind: class.kind.clone(),
        name: String::new(),
        service: partial.service,
        services,
        options: partial.options,
        combination: partial.combination,
        params: partial.params,
        labels: partial.labels,
    };

    let suffix = match &class.name_template {
        Some(template) => template::render_in(&variant, template, &[]).map_err(|source| {
            ExpansionError::NameTemplate {
                class: class.kind.clone(),
                source,
            }
        })?,
        None => partial.parts.join("-"),
    };

    variant.name = if suffix.is_empty() {
        sanitize(&class.kind)
    } else {
        sanitize(&format!("{}-{}", class.kind, suffix))
    };
    Ok(variant)
}

/// Expand a class and, recursively, its children.
pub(crate) fn expand_tree(class: &ClassDescriptor, universe: &Universe) -> Result<Vec<Expansion>, ExpansionError> {
    let mut children = Vec::new();
    for child in &class.children {
        children.extend(expand_tree(child, universe)?);
    }

    Ok(expand(class, universe)?
        .into_iter()
        .map(|variant| Expansion {
            variant,
            class: class.clone(),
            children: children.clone(),
        })
        .collect())
}
