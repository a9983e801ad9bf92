use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// One spreadsheet row as analyzed by the server.
///
/// Field names follow the server's wire format. Anything the server sends
/// that is not modelled here is kept in `extra` so a case sent back for
/// execution or re-analysis is not truncated.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct TestCase {
    pub id: String,
    #[serde(default)]
    pub nombre: String,
    #[serde(default)]
    pub es_valido: bool,
    #[serde(default)]
    pub problemas: Vec<String>,
    #[serde(default)]
    pub sugerencias: Vec<String>,
    #[serde(default)]
    pub historia_usuario: String,
    #[serde(default)]
    pub objetivo: String,
    #[serde(default)]
    pub precondicion: String,
    #[serde(default)]
    pub pasos: String,
    #[serde(default)]
    pub datos_prueba: String,
    #[serde(default)]
    pub resultado_esperado: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_extraida: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub instrucciones_qa_pilot: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_result: Option<CaseExecutionResult>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl TestCase {
    pub fn new(id: impl Into<String>, nombre: impl Into<String>, es_valido: bool) -> Self {
        Self {
            id: id.into(),
            nombre: nombre.into(),
            es_valido,
            ..Default::default()
        }
    }

    /// Name shown to the user, falling back to the id for unnamed rows.
    pub fn display_name(&self) -> &str {
        if self.nombre.trim().is_empty() {
            &self.id
        } else {
            &self.nombre
        }
    }

    pub fn apply_assessment(&mut self, assessment: CaseAssessment) {
        self.es_valido = assessment.es_valido;
        self.problemas = assessment.problemas;
        self.sugerencias = assessment.sugerencias;
        if let Some(instructions) = assessment.instrucciones_qa_pilot {
            self.instrucciones_qa_pilot = instructions;
        }
        if assessment.url_extraida.is_some() {
            self.url_extraida = assessment.url_extraida;
        }
    }
}

/// Outcome of one execution, attached to the case after reconciliation.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct CaseExecutionResult {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: String,
    /// Seconds.
    #[serde(default)]
    pub execution_time: Option<f64>,
    #[serde(default)]
    pub screenshots_count: Option<u32>,
    #[serde(default)]
    pub completed_at: Option<String>,
}

/// Free-text edits from the case editor. `None` leaves a field untouched.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct CasePatch {
    pub nombre: Option<String>,
    pub historia_usuario: Option<String>,
    pub objetivo: Option<String>,
    pub precondicion: Option<String>,
    pub pasos: Option<String>,
    pub datos_prueba: Option<String>,
    pub resultado_esperado: Option<String>,
}

impl CasePatch {
    pub fn is_empty(&self) -> bool {
        self.nombre.is_none()
            && self.historia_usuario.is_none()
            && self.objetivo.is_none()
            && self.precondicion.is_none()
            && self.pasos.is_none()
            && self.datos_prueba.is_none()
            && self.resultado_esperado.is_none()
    }

    /// Merges the edited fields. Validity, problems and suggestions are
    /// never touched here.
    pub fn apply_to(&self, case: &mut TestCase) {
        fn merge(target: &mut String, value: &Option<String>) {
            if let Some(value) = value {
                *target = value.clone();
            }
        }
        merge(&mut case.nombre, &self.nombre);
        merge(&mut case.historia_usuario, &self.historia_usuario);
        merge(&mut case.objetivo, &self.objetivo);
        merge(&mut case.precondicion, &self.precondicion);
        merge(&mut case.pasos, &self.pasos);
        merge(&mut case.datos_prueba, &self.datos_prueba);
        merge(&mut case.resultado_esperado, &self.resultado_esperado);
    }
}

/// Validity verdict returned by the server's re-analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseAssessment {
    pub es_valido: bool,
    pub problemas: Vec<String>,
    pub sugerencias: Vec<String>,
    pub instrucciones_qa_pilot: Option<String>,
    pub url_extraida: Option<String>,
}

impl From<&TestCase> for CaseAssessment {
    fn from(analyzed: &TestCase) -> Self {
        Self {
            es_valido: analyzed.es_valido,
            problemas: analyzed.problemas.clone(),
            sugerencias: analyzed.sugerencias.clone(),
            instrucciones_qa_pilot: if analyzed.instrucciones_qa_pilot.is_empty() {
                None
            } else {
                Some(analyzed.instrucciones_qa_pilot.clone())
            },
            url_extraida: analyzed.url_extraida.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct AnalysisSummary {
    #[serde(default)]
    pub total_casos: usize,
    #[serde(default)]
    pub casos_validos: usize,
    #[serde(default)]
    pub casos_invalidos: usize,
    #[serde(default)]
    pub porcentaje_validos: f64,
}

impl AnalysisSummary {
    pub fn from_cases<'a>(cases: impl IntoIterator<Item = &'a TestCase>) -> Self {
        let (total, valid) = cases.into_iter().fold((0usize, 0usize), |(total, valid), case| {
            (total + 1, valid + usize::from(case.es_valido))
        });
        let percentage = if total == 0 {
            0.0
        } else {
            ((valid as f64 / total as f64) * 10_000.0).round() / 100.0
        };
        Self {
            total_casos: total,
            casos_validos: valid,
            casos_invalidos: total - valid,
            porcentaje_validos: percentage,
        }
    }
}

/// How the server should fill in test data while analyzing a spreadsheet.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DataMode {
    #[default]
    Simulated,
    User,
}

impl DataMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataMode::Simulated => "simulated",
            DataMode::User => "user",
        }
    }
}
