use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unit of asynchronous work, serialized as JSON onto the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Task {
    ProvisionStore { store_id: Uuid },
    DeleteStore { store_id: Uuid },
}

impl Task {
    pub fn kind(&self) -> &'static str {
        match self {
            Task::ProvisionStore { .. } => "provision_store",
            Task::DeleteStore { .. } => "delete_store",
        }
    }

    pub fn store_id(&self) -> Uuid {
        match self {
            Task::ProvisionStore { store_id } | Task::DeleteStore { store_id } => *store_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_roundtrip() {
        let task = Task::ProvisionStore {
            store_id: Uuid::new_v4(),
        };
        let payload = serde_json::to_string(&task).unwrap();
        assert!(payload.contains("provision_store"));
        assert_eq!(serde_json::from_str::<Task>(&payload).unwrap(), task);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let payload = format!(r#"{{"kind":"resize_store","store_id":"{}"}}"#, Uuid::new_v4());
        assert!(serde_json::from_str::<Task>(&payload).is_err());
    }

    #[test]
    fn test_kind_labels() {
        let id = Uuid::new_v4();
        assert_eq!(Task::ProvisionStore { store_id: id }.kind(), "provision_store");
        assert_eq!(Task::DeleteStore { store_id: id }.kind(), "delete_store");
        assert_eq!(Task::DeleteStore { store_id: id }.store_id(), id);
    }
}
