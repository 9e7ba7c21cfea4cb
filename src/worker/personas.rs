//! Built-in persona workers.
//!
//! These produce skeletal, deterministic deliverables straight from the brief.
//! They exist so a run works without any external service; real deployments
//! register [`CommandWorker`](crate::worker::CommandWorker)s instead.

use crate::errors::WorkerError;
use crate::phase::Phase;
use crate::worker::{DomainInput, Worker, WorkerOutput, WorkerRegistry};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// The expert roles shipped with reqflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonaRole {
    SystemAnalyst,
    UxDesigner,
    QaEngineer,
    InfrastructureEngineer,
    SecuritySpecialist,
    DataArchitect,
    SolutionArchitect,
}

impl PersonaRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PersonaRole::SystemAnalyst => "system_analyst",
            PersonaRole::UxDesigner => "ux_designer",
            PersonaRole::QaEngineer => "qa_engineer",
            PersonaRole::InfrastructureEngineer => "infrastructure_engineer",
            PersonaRole::SecuritySpecialist => "security_specialist",
            PersonaRole::DataArchitect => "data_architect",
            PersonaRole::SolutionArchitect => "solution_architect",
        }
    }

    /// The phase this persona contributes to.
    pub fn phase(&self) -> Phase {
        match self {
            PersonaRole::SystemAnalyst => Phase::SystemAnalysis,
            PersonaRole::UxDesigner | PersonaRole::QaEngineer => Phase::FunctionalRequirements,
            PersonaRole::InfrastructureEngineer | PersonaRole::SecuritySpecialist => {
                Phase::NonFunctionalRequirements
            }
            PersonaRole::DataArchitect => Phase::DataArchitecture,
            PersonaRole::SolutionArchitect => Phase::SolutionArchitecture,
        }
    }

    pub const ALL: [PersonaRole; 7] = [
        PersonaRole::SystemAnalyst,
        PersonaRole::UxDesigner,
        PersonaRole::QaEngineer,
        PersonaRole::InfrastructureEngineer,
        PersonaRole::SecuritySpecialist,
        PersonaRole::DataArchitect,
        PersonaRole::SolutionArchitect,
    ];
}

/// Registry with every built-in persona on its phase.
pub fn default_registry() -> WorkerRegistry {
    let mut registry = WorkerRegistry::new();
    for role in PersonaRole::ALL {
        registry.register(role.phase(), PersonaWorker::new(role));
    }
    registry
}

#[derive(Debug, Clone)]
pub struct PersonaWorker {
    role: PersonaRole,
}

impl PersonaWorker {
    pub fn new(role: PersonaRole) -> Self {
        Self { role }
    }

    fn function_candidates(&self, prior: &[WorkerOutput]) -> Result<Vec<String>, WorkerError> {
        let deliverables =
            WorkerOutput::find_deliverables(prior, PersonaRole::SystemAnalyst.as_str())
                .ok_or_else(|| {
                    WorkerError::failed(self.role.as_str(), "system analysis output is missing")
                })?;
        Ok(deliverables
            .get("function_candidates")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.get("name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    fn analyze(&self, input: &DomainInput) -> WorkerOutput {
        let mut candidates = Vec::new();
        for goal in &input.goals {
            candidates.push(json!({ "name": goal, "source": "goal" }));
        }
        for item in &input.scope {
            candidates.push(json!({ "name": item, "source": "scope" }));
        }
        if candidates.is_empty() {
            candidates.push(json!({ "name": input.project_name, "source": "project" }));
        }

        WorkerOutput::new(self.role.as_str())
            .with_deliverable("function_candidates", Value::Array(candidates))
            .with_deliverable(
                "system_boundaries",
                json!({ "in_scope": input.scope, "actors": input.stakeholders }),
            )
            .with_recommendation("Define a minimal feature set before committing to a schedule")
            .with_concern("Ambiguous requirements may change in later phases")
    }

    fn stories(&self, input: &DomainInput, prior: &[WorkerOutput]) -> Result<WorkerOutput, WorkerError> {
        let actor = input
            .stakeholders
            .first()
            .map(String::as_str)
            .unwrap_or("user");
        let requirements: Vec<Value> = self
            .function_candidates(prior)?
            .iter()
            .enumerate()
            .map(|(i, candidate)| {
                json!({
                    "user_story": format!("As a {actor}, I want {candidate}"),
                    "acceptance_criteria": [format!("{candidate} is available to {actor}")],
                    "priority": if i == 0 { "high" } else { "medium" },
                    "complexity": "medium",
                })
            })
            .collect();

        Ok(WorkerOutput::new(self.role.as_str())
            .with_deliverable("functional_requirements", Value::Array(requirements))
            .with_recommendation("Validate the primary user journey with a prototype"))
    }

    fn test_plan(&self, prior: &[WorkerOutput]) -> Result<WorkerOutput, WorkerError> {
        let cases: Vec<Value> = self
            .function_candidates(prior)?
            .iter()
            .map(|c| json!({ "feature": c, "levels": ["unit", "integration", "acceptance"] }))
            .collect();

        Ok(WorkerOutput::new(self.role.as_str())
            .with_deliverable("test_strategy", Value::Array(cases))
            .with_recommendation("Automate acceptance criteria as executable checks"))
    }

    fn operations(&self) -> WorkerOutput {
        WorkerOutput::new(self.role.as_str())
            .with_deliverable(
                "non_functional_requirements",
                json!([
                    {
                        "category": "performance",
                        "requirement": "Interactive requests respond quickly",
                        "target_value": "p95 < 500ms",
                        "test_method": "load test",
                    },
                    {
                        "category": "availability",
                        "requirement": "Service is available during business hours",
                        "target_value": "99.5%",
                        "test_method": "uptime monitoring",
                    },
                ]),
            )
            .with_concern("Capacity estimates are unvalidated")
    }

    fn security(&self) -> WorkerOutput {
        WorkerOutput::new(self.role.as_str())
            .with_deliverable(
                "non_functional_requirements",
                json!([{
                    "category": "security",
                    "requirement": "All access is authenticated and authorized",
                    "target_value": "no anonymous endpoints",
                    "test_method": "penetration test",
                }]),
            )
            .with_recommendation("Threat-model external integrations early")
    }

    fn data_model(&self, input: &DomainInput, prior: &[WorkerOutput]) -> Result<WorkerOutput, WorkerError> {
        let mut entities = vec![json!({
            "entity_name": "Project",
            "attributes": ["id", "name", "created_at"],
            "relationships": [],
        })];
        for candidate in self.function_candidates(prior)? {
            entities.push(json!({
                "entity_name": candidate,
                "attributes": ["id", "project_id", "status"],
                "relationships": ["Project"],
            }));
        }

        Ok(WorkerOutput::new(self.role.as_str())
            .with_deliverable("data_models", Value::Array(entities))
            .with_deliverable("owner", json!(input.project_name)))
    }

    fn architecture(&self, prior: &[WorkerOutput]) -> Result<WorkerOutput, WorkerError> {
        let components = self.function_candidates(prior)?;
        let architecture_type = if components.len() > 5 {
            "microservices"
        } else {
            "modular monolith"
        };

        Ok(WorkerOutput::new(self.role.as_str())
            .with_deliverable(
                "system_architecture",
                json!({
                    "architecture_type": architecture_type,
                    "components": components,
                    "technology_stack": { "backend": "Rust", "database": "PostgreSQL" },
                    "deployment_strategy": "containerized rolling deploys",
                }),
            )
            .with_recommendation("Keep service boundaries aligned with the data model"))
    }
}

#[async_trait]
impl Worker for PersonaWorker {
    fn role(&self) -> &str {
        self.role.as_str()
    }

    async fn execute(
        &self,
        input: &DomainInput,
        prior: &[WorkerOutput],
    ) -> Result<WorkerOutput, WorkerError> {
        match self.role {
            PersonaRole::SystemAnalyst => Ok(self.analyze(input)),
            PersonaRole::UxDesigner => self.stories(input, prior),
            PersonaRole::QaEngineer => self.test_plan(prior),
            PersonaRole::InfrastructureEngineer => Ok(self.operations()),
            PersonaRole::SecuritySpecialist => Ok(self.security()),
            PersonaRole::DataArchitect => self.data_model(input, prior),
            PersonaRole::SolutionArchitect => self.architecture(prior),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brief() -> DomainInput {
        DomainInput::new("Task tracker")
            .with_goal("task visibility")
            .with_goal("deadline tracking")
            .with_stakeholder("project manager")
    }

    #[tokio::test]
    async fn test_analyst_derives_candidates_from_goals() {
        let output = PersonaWorker::new(PersonaRole::SystemAnalyst)
            .execute(&brief(), &[])
            .await
            .unwrap();
        let candidates = output.deliverables["function_candidates"].as_array().unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0]["name"], "task visibility");
    }

    #[tokio::test]
    async fn test_ux_designer_builds_stories_from_analysis() {
        let input = brief();
        let analysis = PersonaWorker::new(PersonaRole::SystemAnalyst)
            .execute(&input, &[])
            .await
            .unwrap();
        let output = PersonaWorker::new(PersonaRole::UxDesigner)
            .execute(&input, &[analysis])
            .await
            .unwrap();
        let stories = output.deliverables["functional_requirements"].as_array().unwrap();
        assert_eq!(stories.len(), 2);
        assert_eq!(
            stories[0]["user_story"],
            "As a project manager, I want task visibility"
        );
    }

    #[tokio::test]
    async fn test_downstream_persona_fails_without_analysis() {
        let err = PersonaWorker::new(PersonaRole::DataArchitect)
            .execute(&brief(), &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("system analysis output is missing"));
    }

    #[test]
    fn test_default_registry_covers_every_work_phase() {
        let registry = default_registry();
        for phase in Phase::WORK_PHASES {
            assert!(!registry.workers(phase).is_empty(), "{phase} has no workers");
        }
        assert_eq!(
            registry.roles(Phase::FunctionalRequirements),
            vec!["ux_designer", "qa_engineer"]
        );
    }
}
