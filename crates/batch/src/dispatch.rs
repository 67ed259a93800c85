//! Static dispatch table from operation kind to People API call

use futures::future::BoxFuture;
use pco_sdk_client::PeopleApi;
use pco_sdk_core::{PcoError, Resource, Result};
use serde_json::Value;

use crate::operation::{OperationKind, ResourceKind, Verb};

/// Input keys that address records rather than describe them
const ADDRESSING_KEYS: &[&str] = &["id", "person_id", "email_id", "phone_number_id", "phone_id"];

/// Arguments for one resolved call
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub person_id: Option<String>,
    /// Id of the record being updated or deleted
    pub target_id: Option<String>,
    pub attributes: Value,
}

fn field(data: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| data.get(*key))
        .find_map(|value| match value {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

impl Call {
    /// Build a call from resolved endpoint ids and payload.
    ///
    /// Ids from the endpoint win over payload fields; `inferred_person` is the
    /// last fallback for the owning person.
    pub fn build(
        kind: OperationKind,
        endpoint_person: Option<String>,
        endpoint_child: Option<String>,
        data: Value,
        inferred_person: Option<String>,
    ) -> Self {
        let (person_id, target_id) = match kind.resource {
            ResourceKind::Person => {
                let target = endpoint_person.or_else(|| field(&data, &["id", "person_id"]));
                (target.clone(), target)
            }
            ResourceKind::Email => (
                endpoint_person.or_else(|| field(&data, &["person_id"])).or(inferred_person),
                endpoint_child.or_else(|| field(&data, &["email_id", "id"])),
            ),
            ResourceKind::PhoneNumber => (
                endpoint_person.or_else(|| field(&data, &["person_id"])).or(inferred_person),
                endpoint_child.or_else(|| field(&data, &["phone_number_id", "phone_id", "id"])),
            ),
        };

        let attributes = match data {
            Value::Object(mut map) => {
                for key in ADDRESSING_KEYS {
                    map.remove(*key);
                }
                Value::Object(map)
            }
            Value::Null => Value::Object(Default::default()),
            other => other,
        };

        Self {
            person_id,
            target_id,
            attributes,
        }
    }

    fn person(&self) -> Result<&str> {
        self.person_id
            .as_deref()
            .ok_or_else(|| PcoError::missing("person_id"))
    }

    fn target(&self) -> Result<&str> {
        self.target_id.as_deref().ok_or_else(|| PcoError::missing("id"))
    }
}

pub type Handler = for<'a> fn(&'a dyn PeopleApi, Call) -> BoxFuture<'a, Result<Option<Resource>>>;

fn create_person(api: &dyn PeopleApi, call: Call) -> BoxFuture<'_, Result<Option<Resource>>> {
    Box::pin(async move { api.create_person(call.attributes).await.map(Some) })
}

fn update_person(api: &dyn PeopleApi, call: Call) -> BoxFuture<'_, Result<Option<Resource>>> {
    Box::pin(async move {
        let id = call.target()?;
        api.update_person(id, call.attributes.clone()).await.map(Some)
    })
}

fn delete_person(api: &dyn PeopleApi, call: Call) -> BoxFuture<'_, Result<Option<Resource>>> {
    Box::pin(async move {
        api.delete_person(call.target()?).await?;
        Ok(None)
    })
}

fn add_email(api: &dyn PeopleApi, call: Call) -> BoxFuture<'_, Result<Option<Resource>>> {
    Box::pin(async move {
        let person = call.person()?;
        api.add_email(person, call.attributes.clone()).await.map(Some)
    })
}

fn update_email(api: &dyn PeopleApi, call: Call) -> BoxFuture<'_, Result<Option<Resource>>> {
    Box::pin(async move {
        let (person, email) = (call.person()?, call.target()?);
        api.update_email(person, email, call.attributes.clone()).await.map(Some)
    })
}

fn delete_email(api: &dyn PeopleApi, call: Call) -> BoxFuture<'_, Result<Option<Resource>>> {
    Box::pin(async move {
        api.delete_email(call.person()?, call.target()?).await?;
        Ok(None)
    })
}

fn add_phone_number(api: &dyn PeopleApi, call: Call) -> BoxFuture<'_, Result<Option<Resource>>> {
    Box::pin(async move {
        let person = call.person()?;
        api.add_phone_number(person, call.attributes.clone()).await.map(Some)
    })
}

fn update_phone_number(api: &dyn PeopleApi, call: Call) -> BoxFuture<'_, Result<Option<Resource>>> {
    Box::pin(async move {
        let (person, phone) = (call.person()?, call.target()?);
        api.update_phone_number(person, phone, call.attributes.clone())
            .await
            .map(Some)
    })
}

fn delete_phone_number(api: &dyn PeopleApi, call: Call) -> BoxFuture<'_, Result<Option<Resource>>> {
    Box::pin(async move {
        api.delete_phone_number(call.person()?, call.target()?).await?;
        Ok(None)
    })
}

static HANDLERS: [(OperationKind, Handler); 9] = [
    (OperationKind::new(ResourceKind::Person, Verb::Create), create_person),
    (OperationKind::new(ResourceKind::Person, Verb::Update), update_person),
    (OperationKind::new(ResourceKind::Person, Verb::Delete), delete_person),
    (OperationKind::new(ResourceKind::Email, Verb::Create), add_email),
    (OperationKind::new(ResourceKind::Email, Verb::Update), update_email),
    (OperationKind::new(ResourceKind::Email, Verb::Delete), delete_email),
    (OperationKind::new(ResourceKind::PhoneNumber, Verb::Create), add_phone_number),
    (OperationKind::new(ResourceKind::PhoneNumber, Verb::Update), update_phone_number),
    (OperationKind::new(ResourceKind::PhoneNumber, Verb::Delete), delete_phone_number),
];

pub fn handler_for(kind: OperationKind) -> Option<Handler> {
    HANDLERS
        .iter()
        .find(|(registered, _)| *registered == kind)
        .map(|(_, handler)| *handler)
}

/// The delete call that reverses a completed create
pub fn inverse_call(
    kind: OperationKind,
    call: &Call,
    created: &Resource,
) -> Option<(OperationKind, Call)> {
    let inverse = kind.inverse()?;
    let person_id = match kind.resource {
        ResourceKind::Person => Some(created.id.clone()),
        ResourceKind::Email | ResourceKind::PhoneNumber => call.person_id.clone(),
    };
    Some((
        inverse,
        Call {
            person_id,
            target_id: Some(created.id.clone()),
            attributes: Value::Object(Default::default()),
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pco_sdk_client::{MockCall, MockPeopleApi};
    use serde_json::json;

    #[test]
    fn test_every_kind_has_a_handler() {
        for resource in [ResourceKind::Person, ResourceKind::Email, ResourceKind::PhoneNumber] {
            for verb in [Verb::Create, Verb::Update, Verb::Delete] {
                assert!(handler_for(OperationKind::new(resource, verb)).is_some());
            }
        }
    }

    #[test]
    fn test_build_call_precedence() {
        let kind = OperationKind::new(ResourceKind::Email, Verb::Update);
        let call = Call::build(
            kind,
            Some("10".into()),
            None,
            json!({"person_id": "99", "email_id": 5, "address": "a@b.co"}),
            Some("77".into()),
        );
        assert_eq!(call.person_id.as_deref(), Some("10"));
        assert_eq!(call.target_id.as_deref(), Some("5"));
        assert_eq!(call.attributes, json!({"address": "a@b.co"}));

        let inferred = Call::build(
            OperationKind::new(ResourceKind::PhoneNumber, Verb::Create),
            None,
            None,
            json!({"number": "555-0100"}),
            Some("77".into()),
        );
        assert_eq!(inferred.person_id.as_deref(), Some("77"));
    }

    #[tokio::test]
    async fn test_handlers_call_api() {
        let api = MockPeopleApi::new();
        let create = handler_for(OperationKind::new(ResourceKind::Person, Verb::Create)).unwrap();
        let person = create(&api, Call::build(
            OperationKind::new(ResourceKind::Person, Verb::Create),
            None,
            None,
            json!({"first_name": "Ada"}),
            None,
        ))
        .await
        .unwrap()
        .unwrap();

        let add = handler_for(OperationKind::new(ResourceKind::Email, Verb::Create)).unwrap();
        let kind = OperationKind::new(ResourceKind::Email, Verb::Create);
        let call = Call::build(
            kind,
            Some(person.id.clone()),
            None,
            json!({"address": "ada@example.com"}),
            None,
        );
        let email = add(&api, call.clone()).await.unwrap().unwrap();
        assert_eq!(api.emails_of(&person.id).len(), 1);

        let (inverse, undo) = inverse_call(kind, &call, &email).unwrap();
        handler_for(inverse).unwrap()(&api, undo).await.unwrap();
        assert!(api.emails_of(&person.id).is_empty());
        assert_eq!(api.call_count(MockCall::DeleteEmail), 1);
    }

    #[tokio::test]
    async fn test_missing_person_id() {
        let api = MockPeopleApi::new();
        let kind = OperationKind::new(ResourceKind::Email, Verb::Create);
        let call = Call::build(kind, None, None, json!({"address": "a@b.co"}), None);
        let err = handler_for(kind).unwrap()(&api, call).await.unwrap_err();
        assert!(matches!(err, PcoError::MissingField(ref field) if field == "person_id"));
    }
}
