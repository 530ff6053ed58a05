//! Custom CA certificates for the serving controller
//!
//! The controller pulls images from registries that may use self-signed
//! certificates. The referenced ConfigMap or Secret is mounted into the
//! controller container and `SSL_CERT_DIR` points at it.

use kube::api::DynamicObject;
use serde_json::{Value, json};

use super::{Transformer, array_at, failure, object_at};
use crate::controller::error::Result;
use crate::crd::CustomCerts;
use crate::manifest::{kind_of, name_of};

pub const CUSTOM_CERTS_VOLUME: &str = "custom-certs";
pub const CUSTOM_CERTS_MOUNT_PATH: &str = "/custom-certs";
pub const CUSTOM_CERTS_ENV: &str = "SSL_CERT_DIR";

const CONTROLLER: &str = "controller";

pub struct CustomCertsTransform {
    certs: Option<CustomCerts>,
}

impl CustomCertsTransform {
    pub fn new(certs: Option<&CustomCerts>) -> Self {
        Self {
            certs: certs.filter(|c| !c.name.is_empty()).cloned(),
        }
    }

    fn volume(&self, certs: &CustomCerts) -> std::result::Result<Value, String> {
        match certs.type_.as_str() {
            "ConfigMap" => Ok(json!({
                "name": CUSTOM_CERTS_VOLUME,
                "configMap": {"name": certs.name}
            })),
            "Secret" => Ok(json!({
                "name": CUSTOM_CERTS_VOLUME,
                "secret": {"secretName": certs.name}
            })),
            other => Err(format!(
                "unknown custom certs type {other:?}, expected ConfigMap or Secret"
            )),
        }
    }
}

impl Transformer for CustomCertsTransform {
    fn name(&self) -> &'static str {
        "custom-certs"
    }

    fn transform(&self, obj: &mut DynamicObject) -> Result<()> {
        let Some(certs) = &self.certs else {
            return Ok(());
        };
        if kind_of(obj) != "Deployment" || name_of(obj) != CONTROLLER {
            return Ok(());
        }
        let fail = failure(self.name(), obj);
        let volume = self.volume(certs).map_err(&fail)?;

        let pod = object_at(&mut obj.data, &["spec", "template", "spec"]).map_err(&fail)?;

        let volumes = array_at(pod, "volumes").map_err(&fail)?;
        replace_named(volumes, CUSTOM_CERTS_VOLUME, volume);

        let containers = array_at(pod, "containers").map_err(&fail)?;
        let Some(container) = containers
            .iter_mut()
            .find(|c| c.get("name").and_then(Value::as_str) == Some(CONTROLLER))
        else {
            return Ok(());
        };
        let container = match container {
            Value::Object(map) => map,
            _ => return Err(fail("container controller is not an object".to_string())),
        };

        let mounts = array_at(container, "volumeMounts").map_err(&fail)?;
        replace_named(
            mounts,
            CUSTOM_CERTS_VOLUME,
            json!({"name": CUSTOM_CERTS_VOLUME, "mountPath": CUSTOM_CERTS_MOUNT_PATH}),
        );

        let env = array_at(container, "env").map_err(&fail)?;
        replace_named(
            env,
            CUSTOM_CERTS_ENV,
            json!({"name": CUSTOM_CERTS_ENV, "value": CUSTOM_CERTS_MOUNT_PATH}),
        );
        Ok(())
    }
}

/// Replace the entry called `name`, or append `value`
fn replace_named(items: &mut Vec<Value>, name: &str, value: Value) {
    match items
        .iter_mut()
        .find(|item| item.get("name").and_then(Value::as_str) == Some(name))
    {
        Some(existing) => *existing = value,
        None => items.push(value),
    }
}

impl From<CustomCerts> for CustomCertsTransform {
    fn from(certs: CustomCerts) -> Self {
        Self::new(Some(&certs))
    }
}
