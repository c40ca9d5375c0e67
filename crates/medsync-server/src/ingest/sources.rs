//! Import source descriptors
//!
//! Every feed the system accepts is described by one `SourceSpec`: how to find
//! its table, how to normalize each field, which fields form the natural key
//! and which reference tables its codes must exist in. The pipeline itself is
//! source-agnostic.

use std::collections::BTreeMap;

use serde::Serialize;

use super::error::{ImportError, Result};

// ============================================================================
// Load chunk bounds
// ============================================================================

/// Smallest accepted load chunk
pub const MIN_CHUNK_SIZE: usize = 100;

/// Largest accepted load chunk
pub const MAX_CHUNK_SIZE: usize = 5000;

/// Chunk size used when a source does not override it
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Normalization applied to a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Upper,
    Identifier,
    Date,
    Cups,
    Cie10,
    Divipola,
}

/// One target field and the header spellings that feed it
#[derive(Debug, Clone, Serialize)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub aliases: &'static [&'static str],
}

const fn field(
    name: &'static str,
    kind: FieldKind,
    aliases: &'static [&'static str],
) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        aliases,
    }
}

/// `target = join(non-empty parts, separator)`
#[derive(Debug, Clone, Serialize)]
pub struct ConcatRule {
    pub target: &'static str,
    pub parts: &'static [&'static str],
    pub separator: &'static str,
}

/// Reference tables codes are validated against
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceTable {
    /// CUPS procedure catalogue
    Procedure,
    /// CIE10 diagnosis catalogue
    Diagnosis,
    /// DIVIPOLA municipality codes
    Geographic,
    /// Known patients, keyed by patient identifier
    Roster,
}

impl ReferenceTable {
    pub fn table_name(self) -> &'static str {
        match self {
            ReferenceTable::Procedure => "ref_cups",
            ReferenceTable::Diagnosis => "ref_cie10",
            ReferenceTable::Geographic => "ref_divipola",
            ReferenceTable::Roster => "ref_roster",
        }
    }
}

impl std::fmt::Display for ReferenceTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table_name())
    }
}

/// What happens to a row whose code is not in the reference table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RulePolicy {
    /// Row is excluded and counted as an error
    Blocking,
    /// Row is kept and the mismatch is reported as a warning
    Advisory,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReferenceRule {
    pub field: &'static str,
    pub table: ReferenceTable,
    pub policy: RulePolicy,
}

const fn rule(field: &'static str, table: ReferenceTable, policy: RulePolicy) -> ReferenceRule {
    ReferenceRule {
        field,
        table,
        policy,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    /// Operator uploads a file
    File,
    /// Server pulls the extract from a remote endpoint
    Cloud,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Active,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputFormat {
    /// HTML table or binary workbook, read whole
    Spreadsheet,
    /// Delimited text, streamed line by line
    Delimited,
}

/// Static description of one import source
#[derive(Debug, Clone, Serialize)]
pub struct SourceSpec {
    pub id: &'static str,
    pub label: &'static str,
    pub target_table: &'static str,
    pub mode: SourceMode,
    pub status: SourceStatus,
    pub format: InputFormat,
    /// Normalized header cells that identify the data table
    pub required_headers: &'static [&'static str],
    pub fields: Vec<FieldSpec>,
    pub natural_key: &'static [&'static str],
    pub concat: Vec<ConcatRule>,
    pub references: Vec<ReferenceRule>,
    pub chunk_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_url: Option<String>,
}

impl SourceSpec {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn is_key_field(&self, name: &str) -> bool {
        self.natural_key.contains(&name)
    }

    /// Fail unless the source may be run in the requested mode
    pub fn ensure_runnable(&self, mode: SourceMode) -> Result<()> {
        if self.status == SourceStatus::Disabled {
            return Err(ImportError::SourceDisabled(self.id.to_string()));
        }
        if self.mode != mode {
            return Err(ImportError::WrongMode {
                source_id: self.id.to_string(),
                mode: match mode {
                    SourceMode::File => "file",
                    SourceMode::Cloud => "cloud",
                },
            });
        }
        Ok(())
    }
}

// ============================================================================
// Built-in sources
// ============================================================================

const SERVICE_DATE: FieldSpec = field(
    "service_date",
    FieldKind::Date,
    &["fecha", "fecha atencion", "fecha servicio", "fecha procedimiento"],
);

const PATIENT_ID: FieldSpec = field(
    "patient_id",
    FieldKind::Identifier,
    &["idpcte", "id paciente", "numero id", "numero documento", "identificacion", "documento"],
);

const ID_TYPE: FieldSpec = field(
    "id_type",
    FieldKind::Upper,
    &["tipo id", "tipoid", "tipo documento", "tipo identificacion"],
);

fn roster(id: &'static str, label: &'static str, mode: SourceMode, format: InputFormat) -> SourceSpec {
    SourceSpec {
        id,
        label,
        target_table: "patients",
        mode,
        status: SourceStatus::Active,
        format,
        required_headers: &["tipo id", "numero id"],
        fields: vec![
            ID_TYPE,
            PATIENT_ID,
            field("first_name", FieldKind::Upper, &["primer nombre", "nombre1"]),
            field("middle_name", FieldKind::Upper, &["segundo nombre", "nombre2"]),
            field("last_name", FieldKind::Upper, &["primer apellido", "apellido1"]),
            field("second_last_name", FieldKind::Upper, &["segundo apellido", "apellido2"]),
            field("birth_date", FieldKind::Date, &["fecha nacimiento", "nacimiento"]),
            field("sex", FieldKind::Upper, &["sexo", "genero"]),
            field(
                "municipality",
                FieldKind::Divipola,
                &["municipio", "cod municipio", "divipola", "codigo municipio"],
            ),
            field("insurer", FieldKind::Upper, &["eps", "aseguradora", "administradora"]),
        ],
        natural_key: &["id_type", "patient_id"],
        concat: vec![ConcatRule {
            target: "full_name",
            parts: &["first_name", "middle_name", "last_name", "second_last_name"],
            separator: " ",
        }],
        references: vec![rule("municipality", ReferenceTable::Geographic, RulePolicy::Advisory)],
        chunk_size: if format == InputFormat::Delimited {
            MAX_CHUNK_SIZE
        } else {
            DEFAULT_CHUNK_SIZE
        },
        cloud_url: None,
    }
}

fn procedures() -> SourceSpec {
    SourceSpec {
        id: "procedures",
        label: "Procedimientos realizados",
        target_table: "procedures",
        mode: SourceMode::File,
        status: SourceStatus::Active,
        format: InputFormat::Spreadsheet,
        required_headers: &["fecha", "idpcte", "cups"],
        fields: vec![
            SERVICE_DATE,
            ID_TYPE,
            PATIENT_ID,
            field("cups", FieldKind::Cups, &["cups", "codigo cups", "cod procedimiento"]),
            field("quantity", FieldKind::Identifier, &["cantidad", "cant"]),
            field("provider", FieldKind::Upper, &["prestador", "ips", "sede"]),
            field("professional", FieldKind::Upper, &["profesional", "medico"]),
        ],
        natural_key: &["service_date", "patient_id", "cups"],
        concat: Vec::new(),
        references: vec![
            rule("cups", ReferenceTable::Procedure, RulePolicy::Blocking),
            rule("patient_id", ReferenceTable::Roster, RulePolicy::Advisory),
        ],
        chunk_size: DEFAULT_CHUNK_SIZE,
        cloud_url: None,
    }
}

fn diagnoses() -> SourceSpec {
    SourceSpec {
        id: "diagnoses",
        label: "Diagnosticos",
        target_table: "diagnoses",
        mode: SourceMode::File,
        status: SourceStatus::Active,
        format: InputFormat::Spreadsheet,
        required_headers: &["fecha", "idpcte", "cie10"],
        fields: vec![
            SERVICE_DATE,
            ID_TYPE,
            PATIENT_ID,
            field("cie10", FieldKind::Cie10, &["cie10", "cie 10", "codigo diagnostico", "dx"]),
            field("diagnosis_type", FieldKind::Upper, &["tipo diagnostico", "tipo dx"]),
            field("description", FieldKind::Text, &["descripcion", "nombre diagnostico"]),
        ],
        natural_key: &["service_date", "patient_id", "cie10"],
        concat: Vec::new(),
        references: vec![
            rule("cie10", ReferenceTable::Diagnosis, RulePolicy::Blocking),
            rule("patient_id", ReferenceTable::Roster, RulePolicy::Advisory),
        ],
        chunk_size: DEFAULT_CHUNK_SIZE,
        cloud_url: None,
    }
}

fn visits() -> SourceSpec {
    SourceSpec {
        id: "visits",
        label: "Consultas",
        target_table: "visits",
        mode: SourceMode::File,
        status: SourceStatus::Active,
        format: InputFormat::Spreadsheet,
        required_headers: &["fecha", "idpcte"],
        fields: vec![
            SERVICE_DATE,
            ID_TYPE,
            PATIENT_ID,
            field("cie10", FieldKind::Cie10, &["dx principal", "diagnostico principal", "cie10"]),
            field("visit_type", FieldKind::Upper, &["tipo consulta", "finalidad"]),
            field("professional", FieldKind::Upper, &["profesional", "medico"]),
            field("notes", FieldKind::Text, &["observaciones", "notas"]),
        ],
        natural_key: &["service_date", "patient_id"],
        concat: Vec::new(),
        references: vec![
            rule("cie10", ReferenceTable::Diagnosis, RulePolicy::Blocking),
            rule("patient_id", ReferenceTable::Roster, RulePolicy::Advisory),
        ],
        chunk_size: DEFAULT_CHUNK_SIZE,
        cloud_url: None,
    }
}

/// The set of sources this deployment accepts
#[derive(Debug, Clone)]
pub struct SourceCatalog {
    sources: BTreeMap<&'static str, SourceSpec>,
}

impl SourceCatalog {
    pub fn builtin() -> Self {
        Self::from_specs(vec![
            roster("roster_local", "Padron local", SourceMode::File, InputFormat::Spreadsheet),
            roster(
                "roster_federal",
                "Padron nacional",
                SourceMode::Cloud,
                InputFormat::Delimited,
            ),
            procedures(),
            diagnoses(),
            visits(),
        ])
    }

    pub fn from_specs(specs: Vec<SourceSpec>) -> Self {
        Self {
            sources: specs.into_iter().map(|s| (s.id, s)).collect(),
        }
    }

    pub fn get(&self, id: &str) -> Result<&SourceSpec> {
        self.sources
            .get(id)
            .ok_or_else(|| ImportError::UnknownSource(id.to_string()))
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut SourceSpec> {
        self.sources.get_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceSpec> {
        self.sources.values()
    }

    /// Apply a chunk-size override, clamped to the accepted bounds
    pub fn set_chunk_size(&mut self, id: &str, size: usize) {
        if let Some(spec) = self.sources.get_mut(id) {
            spec.chunk_size = size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE);
        }
    }

    /// Cloud sources without a URL stay in the catalogue but are disabled
    pub fn set_cloud_url(&mut self, id: &str, url: Option<String>) {
        if let Some(spec) = self.sources.get_mut(id) {
            spec.cloud_url = url;
        }
    }
}
