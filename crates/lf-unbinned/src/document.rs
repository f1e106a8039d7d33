//! Loss document v0: a versioned, name-referenced description of a loss.
//!
//! PDFs, datasets and parameters are declared once and referenced by name, so
//! a PDF shared by two terms (or used both in a term and as a prior) compiles
//! back to a single [`Pdf`] handle. PDF types are resolved through an explicit
//! [`PdfRegistry`] of converters keyed by type tag.
//!
//! Documents are read as YAML (a superset of JSON) with `serde_yaml_ng`.

#![allow(missing_docs)]

use anyhow::{Context, Result};
use lf_core::{Domain, Error, Limits, ParamSet, Parameter, ParameterSpec};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use crate::constraint::{Constraint, Constraints};
use crate::event_store::EventStore;
use crate::nll::UnbinnedNll;
use crate::pdf::{Pdf, ShapeParam};
use crate::simultaneous::{NllTerms, SimultaneousLoss, compose};

pub const LOSS_DOCUMENT_V0: &str = "lossfit_loss_v0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LossDocument {
    pub schema_version: String,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    #[serde(default)]
    pub datasets: Vec<DatasetSpec>,
    /// Components must be declared before the PDFs that use them.
    #[serde(default)]
    pub pdfs: Vec<PdfSpec>,
    pub terms: Vec<TermSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSpec {
    pub name: String,
    pub columns: BTreeMap<String, Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdfSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub type_tag: String,
    #[serde(default)]
    pub observables: Vec<String>,
    /// Own parameter slots (fractions for `sum`).
    #[serde(default)]
    pub params: Vec<ParamRef>,
    /// Names of component PDFs (functors only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<String>,
}

/// A parameter slot: a parameter name or a constant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamRef {
    Name(String),
    Constant(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermSpec {
    pub parts: Vec<PartSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<ConstraintSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartSpec {
    pub pdf: String,
    pub data: String,
    pub fit_range: Domain,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintSpec {
    pub param: String,
    pub pdf: String,
}

/// Builds a [`Pdf`] of one type from its document entry.
pub trait PdfConverter: Send + Sync {
    /// Type tag this converter handles.
    fn type_tag(&self) -> &'static str;

    /// Build the PDF from resolved parameter slots and components.
    fn build(
        &self,
        spec: &PdfSpec,
        params: Vec<ShapeParam>,
        components: Vec<Pdf>,
    ) -> lf_core::Result<Pdf>;

    /// Document entry for `pdf`.
    fn describe(&self, pdf: &Pdf) -> PdfSpec {
        PdfSpec {
            name: pdf.name().to_string(),
            type_tag: pdf.type_tag().to_string(),
            observables: pdf.observables().to_vec(),
            params: pdf
                .own_params()
                .iter()
                .map(|s| match s {
                    ShapeParam::Constant(v) => ParamRef::Constant(*v),
                    ShapeParam::Param(p) => ParamRef::Name(p.name().to_string()),
                })
                .collect(),
            components: pdf.components().iter().map(|c| c.name().to_string()).collect(),
        }
    }
}

fn single_observable(spec: &PdfSpec) -> lf_core::Result<&str> {
    match spec.observables.as_slice() {
        [obs] => Ok(obs),
        other => Err(Error::Validation(format!(
            "pdf '{}' ({}) needs exactly one observable, got {}",
            spec.name,
            spec.type_tag,
            other.len()
        ))),
    }
}

fn expect_slots(spec: &PdfSpec, params: &[ShapeParam], n: usize) -> lf_core::Result<()> {
    if params.len() != n {
        return Err(Error::Validation(format!(
            "pdf '{}' ({}) takes {n} params, got {}",
            spec.name,
            spec.type_tag,
            params.len()
        )));
    }
    Ok(())
}

fn expect_plain(spec: &PdfSpec, components: &[Pdf]) -> lf_core::Result<()> {
    if !components.is_empty() {
        return Err(Error::Validation(format!(
            "pdf '{}' ({}) does not take components",
            spec.name, spec.type_tag
        )));
    }
    Ok(())
}

struct GaussConverter;

impl PdfConverter for GaussConverter {
    fn type_tag(&self) -> &'static str {
        "gauss"
    }

    fn build(
        &self,
        spec: &PdfSpec,
        params: Vec<ShapeParam>,
        components: Vec<Pdf>,
    ) -> lf_core::Result<Pdf> {
        expect_plain(spec, &components)?;
        expect_slots(spec, &params, 2)?;
        let obs = single_observable(spec)?;
        let [mu, sigma]: [ShapeParam; 2] = params
            .try_into()
            .map_err(|_| Error::Validation(format!("pdf '{}': bad params", spec.name)))?;
        Ok(Pdf::gaussian(spec.name.clone(), obs, mu, sigma))
    }
}

struct ExponentialConverter;

impl PdfConverter for ExponentialConverter {
    fn type_tag(&self) -> &'static str {
        "exponential"
    }

    fn build(
        &self,
        spec: &PdfSpec,
        params: Vec<ShapeParam>,
        components: Vec<Pdf>,
    ) -> lf_core::Result<Pdf> {
        expect_plain(spec, &components)?;
        expect_slots(spec, &params, 1)?;
        let obs = single_observable(spec)?;
        let lambda = params.into_iter().next().ok_or_else(|| {
            Error::Validation(format!("pdf '{}' is missing lambda", spec.name))
        })?;
        Ok(Pdf::exponential(spec.name.clone(), obs, lambda))
    }
}

struct SumConverter;

impl PdfConverter for SumConverter {
    fn type_tag(&self) -> &'static str {
        "sum"
    }

    fn build(
        &self,
        spec: &PdfSpec,
        params: Vec<ShapeParam>,
        components: Vec<Pdf>,
    ) -> lf_core::Result<Pdf> {
        if components.len() < 2 {
            return Err(Error::Validation(format!(
                "pdf '{}' (sum) needs at least 2 components, got {}",
                spec.name,
                components.len()
            )));
        }
        expect_slots(spec, &params, components.len() - 1)?;
        let pdf = Pdf::sum(spec.name.clone(), components, params)?;
        if !spec.observables.is_empty() && spec.observables != pdf.observables() {
            return Err(Error::Validation(format!(
                "pdf '{}' declares observables {:?} but its components use {:?}",
                spec.name,
                spec.observables,
                pdf.observables()
            )));
        }
        Ok(pdf)
    }
}

/// Type tag -> converter map.
#[derive(Clone, Default)]
pub struct PdfRegistry {
    converters: HashMap<&'static str, Arc<dyn PdfConverter>>,
}

impl PdfRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `gauss`, `exponential` and `sum`.
    pub fn with_builtins() -> Self {
        let converters = [
            Arc::new(GaussConverter) as Arc<dyn PdfConverter>,
            Arc::new(ExponentialConverter),
            Arc::new(SumConverter),
        ];
        Self { converters: converters.into_iter().map(|c| (c.type_tag(), c)).collect() }
    }

    /// Register a converter; a tag can only be registered once.
    pub fn register(&mut self, converter: Arc<dyn PdfConverter>) -> lf_core::Result<()> {
        let tag = converter.type_tag();
        if self.converters.contains_key(tag) {
            return Err(Error::Validation(format!("pdf type '{tag}' is already registered")));
        }
        self.converters.insert(tag, converter);
        Ok(())
    }

    /// Converter for `tag`.
    pub fn get(&self, tag: &str) -> lf_core::Result<&Arc<dyn PdfConverter>> {
        self.converters
            .get(tag)
            .ok_or_else(|| Error::Validation(format!("unknown pdf type '{tag}'")))
    }

    /// Registered tags, sorted.
    pub fn tags(&self) -> Vec<&'static str> {
        let mut tags: Vec<_> = self.converters.keys().copied().collect();
        tags.sort_unstable();
        tags
    }
}

impl std::fmt::Debug for PdfRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfRegistry").field("tags", &self.tags()).finish()
    }
}

/// Collects shared objects while walking a loss, naming each once.
#[derive(Default)]
struct DocumentBuilder {
    params: ParamSet,
    datasets: Vec<(Arc<EventStore>, String)>,
    pdfs: Vec<Pdf>,
    pdf_specs: Vec<PdfSpec>,
}

impl DocumentBuilder {
    fn add_pdf(&mut self, pdf: &Pdf, registry: &PdfRegistry) -> Result<String> {
        if self.pdfs.contains(pdf) {
            return Ok(pdf.name().to_string());
        }
        if self.pdf_specs.iter().any(|s| s.name == pdf.name()) {
            anyhow::bail!("two different pdfs share the name '{}'", pdf.name());
        }
        for c in pdf.components() {
            self.add_pdf(c, registry)?;
        }
        self.params.union(&pdf.dependent_parameters(false)?)?;
        let spec = registry.get(pdf.type_tag())?.describe(pdf);
        self.pdfs.push(pdf.clone());
        self.pdf_specs.push(spec);
        Ok(pdf.name().to_string())
    }

    fn add_data(&mut self, data: &Arc<EventStore>) -> String {
        if let Some((_, name)) = self.datasets.iter().find(|(d, _)| Arc::ptr_eq(d, data)) {
            return name.clone();
        }
        let name = format!("data_{}", self.datasets.len());
        self.datasets.push((data.clone(), name.clone()));
        name
    }
}

fn dataset_spec(name: &str, store: &EventStore) -> DatasetSpec {
    let columns = store
        .column_names()
        .iter()
        .filter_map(|c| store.column(c).map(|v| (c.clone(), v.to_vec())))
        .collect();
    DatasetSpec { name: name.to_string(), columns, weights: store.weights().map(<[f64]>::to_vec) }
}

/// Describe `loss` as a document.
pub fn to_document<L: NllTerms + ?Sized>(loss: &L, registry: &PdfRegistry) -> Result<LossDocument> {
    let mut b = DocumentBuilder::default();
    let mut terms = Vec::with_capacity(loss.terms().len());
    for term in loss.terms() {
        let mut parts = Vec::with_capacity(term.n_parts());
        for ((pdf, data), range) in term.pdfs().iter().zip(term.data()).zip(term.fit_ranges()) {
            parts.push(PartSpec {
                pdf: b.add_pdf(pdf, registry)?,
                data: b.add_data(data),
                fit_range: range.clone(),
            });
        }
        let mut constraints = Vec::with_capacity(term.constraints().len());
        for c in term.constraints().iter() {
            b.params.insert(c.param().clone())?;
            constraints.push(ConstraintSpec {
                param: c.param().name().to_string(),
                pdf: b.add_pdf(c.pdf(), registry)?,
            });
        }
        terms.push(TermSpec { parts, constraints });
    }

    Ok(LossDocument {
        schema_version: LOSS_DOCUMENT_V0.to_string(),
        parameters: b.params.iter().map(Parameter::to_spec).collect(),
        datasets: b.datasets.iter().map(|(d, name)| dataset_spec(name, d)).collect(),
        pdfs: b.pdf_specs,
        terms,
    })
}

fn check_schema(doc: &LossDocument) -> Result<()> {
    if doc.schema_version != LOSS_DOCUMENT_V0 {
        anyhow::bail!(
            "unsupported schema_version: {} (expected {})",
            doc.schema_version,
            LOSS_DOCUMENT_V0
        );
    }
    Ok(())
}

/// Build the loss a document describes.
pub fn compile(doc: &LossDocument, registry: &PdfRegistry) -> Result<SimultaneousLoss> {
    check_schema(doc)?;
    if doc.terms.is_empty() {
        anyhow::bail!("loss document: terms must be non-empty");
    }

    let mut params = HashMap::<&str, Parameter>::new();
    for spec in &doc.parameters {
        let p = Parameter::from_spec(spec)
            .with_context(|| format!("invalid parameter '{}'", spec.name))?;
        if params.insert(spec.name.as_str(), p).is_some() {
            anyhow::bail!("duplicate parameter name: '{}'", spec.name);
        }
    }

    let mut datasets = HashMap::<&str, Arc<EventStore>>::new();
    for ds in &doc.datasets {
        let names: Vec<&str> = ds.columns.keys().map(String::as_str).collect();
        let columns = ds.columns.iter().map(|(k, v)| (k.clone(), v.clone()));
        let store = EventStore::from_columns(&names, columns, ds.weights.clone())
            .with_context(|| format!("invalid dataset '{}'", ds.name))?;
        if datasets.insert(ds.name.as_str(), Arc::new(store)).is_some() {
            anyhow::bail!("duplicate dataset name: '{}'", ds.name);
        }
    }

    let mut pdfs = HashMap::<&str, Pdf>::new();
    for spec in &doc.pdfs {
        let slots = spec
            .params
            .iter()
            .map(|r| match r {
                ParamRef::Constant(v) => Ok(ShapeParam::Constant(*v)),
                ParamRef::Name(n) => params.get(n.as_str()).cloned().map(ShapeParam::Param).ok_or_else(
                    || anyhow::anyhow!("pdf '{}' references unknown parameter '{n}'", spec.name),
                ),
            })
            .collect::<Result<Vec<_>>>()?;
        let components = spec
            .components
            .iter()
            .map(|c| {
                pdfs.get(c.as_str()).cloned().ok_or_else(|| {
                    anyhow::anyhow!(
                        "pdf '{}' references component '{c}', which is not declared before it",
                        spec.name
                    )
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let pdf = registry
            .get(&spec.type_tag)?
            .build(spec, slots, components)
            .with_context(|| format!("failed to build pdf '{}'", spec.name))?;
        if pdfs.insert(spec.name.as_str(), pdf).is_some() {
            anyhow::bail!("duplicate pdf name: '{}'", spec.name);
        }
    }

    let mut terms = Vec::with_capacity(doc.terms.len());
    for (i, t) in doc.terms.iter().enumerate() {
        let mut part_pdfs = Vec::with_capacity(t.parts.len());
        let mut part_data = Vec::with_capacity(t.parts.len());
        let mut ranges: Vec<Limits> = Vec::with_capacity(t.parts.len());
        for part in &t.parts {
            part_pdfs.push(
                pdfs.get(part.pdf.as_str())
                    .cloned()
                    .ok_or_else(|| anyhow::anyhow!("term {i} references unknown pdf '{}'", part.pdf))?,
            );
            part_data.push(datasets.get(part.data.as_str()).cloned().ok_or_else(|| {
                anyhow::anyhow!("term {i} references unknown dataset '{}'", part.data)
            })?);
            ranges.push(part.fit_range.clone().into());
        }

        let mut constraints = Constraints::new();
        for c in &t.constraints {
            let param = params.get(c.param.as_str()).cloned().ok_or_else(|| {
                anyhow::anyhow!("term {i} constrains unknown parameter '{}'", c.param)
            })?;
            let pdf = pdfs.get(c.pdf.as_str()).cloned().ok_or_else(|| {
                anyhow::anyhow!("term {i} uses unknown constraint pdf '{}'", c.pdf)
            })?;
            constraints.insert(Constraint::new(param, pdf)?)?;
        }

        terms.push(
            UnbinnedNll::from_parts(part_pdfs, part_data, ranges, constraints)
                .with_context(|| format!("invalid term {i}"))?,
        );
    }

    tracing::debug!(n_terms = terms.len(), n_pdfs = pdfs.len(), "compiled loss document");
    Ok(compose(&terms)?)
}

/// Pretty JSON.
pub fn to_json(doc: &LossDocument) -> Result<String> {
    serde_json::to_string_pretty(doc).context("failed to serialize loss document to JSON")
}

/// YAML.
pub fn to_yaml(doc: &LossDocument) -> Result<String> {
    serde_yaml_ng::to_string(doc).context("failed to serialize loss document to YAML")
}

/// Parse a document from YAML or JSON text and check its schema version.
pub fn parse_document(text: &str) -> Result<LossDocument> {
    let doc: LossDocument =
        serde_yaml_ng::from_str(text).context("failed to parse loss document (YAML/JSON)")?;
    check_schema(&doc)?;
    Ok(doc)
}

/// Read a document from a YAML or JSON file.
pub fn read_document(path: &Path) -> Result<LossDocument> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let doc: LossDocument = serde_yaml_ng::from_slice(&bytes).with_context(|| {
        format!("failed to parse loss document (YAML/JSON) from {}", path.display())
    })?;
    check_schema(&doc)?;
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"
schema_version: lossfit_loss_v0
parameters:
  - { name: mu, init: 1.0, bounds: [0.0, 2.0] }
  - { name: sigma, init: 0.5, bounds: [0.1, "inf"] }
  - { name: lam, init: -0.4 }
  - { name: frac, init: 0.3, bounds: [0.0, 1.0] }
datasets:
  - name: d0
    columns: { x: [0.5, 1.0, 1.5, 3.0] }
pdfs:
  - { name: sig, type: gauss, observables: [x], params: [mu, sigma] }
  - { name: bkg, type: exponential, observables: [x], params: [lam] }
  - { name: model, type: sum, params: [frac], components: [sig, bkg] }
  - { name: mu_prior, type: gauss, observables: [m], params: [1.0, 0.1] }
terms:
  - parts:
      - { pdf: model, data: d0, fit_range: { lower: [0.0], upper: [5.0], dims: [0] } }
    constraints:
      - { param: mu, pdf: mu_prior }
"#;

    #[test]
    fn test_parse_and_compile() {
        let doc = parse_document(DOC).unwrap();
        let loss = compile(&doc, &PdfRegistry::with_builtins()).unwrap();
        assert_eq!(loss.terms().len(), 1);
        assert_eq!(loss.pdfs()[0].name(), "model");
        assert_eq!(loss.constraints().len(), 1);
        assert_eq!(loss.pdfs()[0].components().len(), 2);
    }

    #[test]
    fn test_document_round_trip_through_loss() {
        let registry = PdfRegistry::with_builtins();
        let doc = parse_document(DOC).unwrap();
        let loss = compile(&doc, &registry).unwrap();
        let again = to_document(&loss, &registry).unwrap();

        assert_eq!(again.parameters.len(), 4);
        assert_eq!(again.datasets.len(), 1);
        assert_eq!(
            again.pdfs.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            vec!["sig", "bkg", "model", "mu_prior"]
        );
        let reparsed = parse_document(&to_json(&again).unwrap()).unwrap();
        assert_eq!(reparsed, again);
        let from_yaml = parse_document(&to_yaml(&again).unwrap()).unwrap();
        assert_eq!(from_yaml, again);
    }

    #[test]
    fn test_unknown_type_and_schema() {
        let bad_type = DOC.replace("type: exponential", "type: landau");
        let doc = parse_document(&bad_type).unwrap();
        let err = compile(&doc, &PdfRegistry::with_builtins()).unwrap_err();
        assert!(format!("{err:#}").contains("unknown pdf type 'landau'"));

        let bad_version = DOC.replace("lossfit_loss_v0", "lossfit_loss_v9");
        assert!(parse_document(&bad_version).is_err());
    }

    #[test]
    fn test_component_must_be_declared_first() {
        let reordered = DOC
            .replace("  - { name: sig, type: gauss, observables: [x], params: [mu, sigma] }\n", "")
            .replace(
                "  - { name: mu_prior,",
                "  - { name: sig, type: gauss, observables: [x], params: [mu, sigma] }\n  - { name: mu_prior,",
            );
        let doc = parse_document(&reordered).unwrap();
        assert!(compile(&doc, &PdfRegistry::with_builtins()).is_err());
    }

    #[test]
    fn test_duplicate_registration() {
        let mut reg = PdfRegistry::with_builtins();
        assert!(reg.register(Arc::new(GaussConverter)).is_err());
        assert_eq!(reg.tags(), vec!["exponential", "gauss", "sum"]);
        for tag in reg.tags() {
            assert_eq!(reg.get(tag).unwrap().type_tag(), tag);
        }
    }
}
