//! Pure, order-preserving filters over the integration catalog.
//!
//! None of these functions mutate their input; rules are shared through `Arc`, so filtering
//! only clones handles.

use std::sync::Arc;

use crate::{
    integration::{Integration, IntegrationMethod, MethodReplacement, Version},
    metadata::{host::AssemblyImport, resolver},
};

/// Drop every integration whose name appears in `disabled`.
#[must_use]
pub fn filter_by_name(integrations: &[Integration], disabled: &[String]) -> Vec<Integration> {
    integrations
        .iter()
        .filter(|integration| !disabled.iter().any(|name| *name == integration.name))
        .cloned()
        .collect()
}

/// Expand every integration into one [`IntegrationMethod`] per rule.
#[must_use]
pub fn flatten_integrations(integrations: &[Integration]) -> Vec<IntegrationMethod> {
    integrations
        .iter()
        .flat_map(|integration| {
            let name: Arc<str> = Arc::from(integration.name.as_str());
            integration
                .method_replacements
                .iter()
                .map(move |replacement| IntegrationMethod {
                    integration_name: name.clone(),
                    replacement: replacement.clone(),
                })
        })
        .collect()
}

/// Keep the rules whose caller restriction admits `assembly_name`.
///
/// Rules without an assembly restriction are always kept; otherwise the names must be equal
/// (case-sensitive).
#[must_use]
pub fn filter_by_caller(methods: &[IntegrationMethod], assembly_name: &str) -> Vec<IntegrationMethod> {
    methods
        .iter()
        .filter(|method| method.replacement.caller.allows_assembly(assembly_name))
        .cloned()
        .collect()
}

/// Keep the rules whose target assembly is referenced by the module behind `import`, at a
/// version inside the rule's range.
///
/// The module's assembly references are enumerated once per call.
#[must_use]
pub fn filter_by_target(
    methods: &[IntegrationMethod],
    import: &dyn AssemblyImport,
) -> Vec<IntegrationMethod> {
    let references: Vec<(String, Version)> = resolver::assembly_refs(import)
        .into_iter()
        .map(|(_, props)| {
            let version = Version::new(
                props.metadata.major,
                props.metadata.minor,
                props.metadata.build,
                props.metadata.revision,
            );
            (props.name.to_string_lossy(), version)
        })
        .collect();

    methods
        .iter()
        .filter(|method| {
            let target = &method.replacement.target;
            references
                .iter()
                .any(|(name, version)| *name == target.assembly && target.matches_version(*version))
        })
        .cloned()
        .collect()
}

/// The rules of `methods` that apply inside the method `method_name` of `type_name`.
#[must_use]
pub fn replacements_for_caller(
    methods: &[IntegrationMethod],
    type_name: &str,
    method_name: &str,
) -> Vec<Arc<MethodReplacement>> {
    methods
        .iter()
        .filter(|method| method.replacement.caller.allows_method(type_name, method_name))
        .map(|method| method.replacement.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use widestring::U16String;

    use super::*;
    use crate::{
        integration::{CallerRestriction, TargetMethod},
        metadata::{
            host::{AssemblyMetadata, AssemblyProps, EnumHandle, HResult, HostResult},
            token::Token,
        },
    };

    struct References(Vec<(&'static str, [u16; 4])>);

    impl AssemblyImport for References {
        fn get_assembly_from_scope(&self) -> HostResult<Token> {
            Err(HResult::E_FAIL)
        }
        fn get_assembly_props(&self, _: Token) -> HostResult<AssemblyProps> {
            Err(HResult::E_FAIL)
        }
        fn enum_assembly_refs(&self, handle: &mut EnumHandle, _: usize) -> HostResult<Vec<Token>> {
            if *handle != 0 {
                return Ok(Vec::new());
            }
            *handle = 1;
            Ok((1..=self.0.len() as u32)
                .map(|row| Token::new(0x2300_0000 | row))
                .collect())
        }
        fn get_assembly_ref_props(&self, token: Token) -> HostResult<AssemblyProps> {
            let (name, [major, minor, build, revision]) = self.0[token.row() as usize - 1];
            Ok(AssemblyProps {
                name: U16String::from_str(name),
                metadata: AssemblyMetadata {
                    major,
                    minor,
                    build,
                    revision,
                    locale: U16String::new(),
                },
                ..AssemblyProps::default()
            })
        }
        fn close_enum(&self, _: EnumHandle) {}
    }

    fn rule(caller: Option<&str>, target_assembly: &str, method: &str) -> Arc<MethodReplacement> {
        Arc::new(MethodReplacement {
            caller: CallerRestriction {
                assembly: caller.map(str::to_string),
                ..CallerRestriction::default()
            },
            target: TargetMethod {
                assembly: target_assembly.to_string(),
                type_name: "T".to_string(),
                method_name: method.to_string(),
                min_version: Version::new(4, 0, 0, 0),
                max_version: Version::new(4, 65535, 65535, 65535),
                ..TargetMethod::default()
            },
            ..MethodReplacement::default()
        })
    }

    fn catalog() -> Vec<Integration> {
        vec![
            Integration {
                name: "AdoNet".into(),
                method_replacements: vec![
                    rule(None, "System.Data", "ExecuteReader"),
                    rule(Some("MyApp"), "System.Data", "ExecuteScalar"),
                ],
            },
            Integration {
                name: "Http".into(),
                method_replacements: vec![rule(None, "System.Net.Http", "SendAsync")],
            },
        ]
    }

    fn method_names(methods: &[IntegrationMethod]) -> Vec<&str> {
        methods
            .iter()
            .map(|method| method.replacement.target.method_name.as_str())
            .collect()
    }

    #[test]
    fn flatten_keeps_order_and_owner() {
        let flat = flatten_integrations(&catalog());

        assert_eq!(method_names(&flat), ["ExecuteReader", "ExecuteScalar", "SendAsync"]);
        assert_eq!(&*flat[1].integration_name, "AdoNet");
        assert_eq!(&*flat[2].integration_name, "Http");
    }

    #[test]
    fn by_name() {
        let kept = filter_by_name(&catalog(), &["Http".to_string()]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "AdoNet");
        assert_eq!(filter_by_name(&catalog(), &[]).len(), 2);
    }

    #[test]
    fn by_caller_is_idempotent() {
        let flat = flatten_integrations(&catalog());

        let once = filter_by_caller(&flat, "OtherApp");
        assert_eq!(method_names(&once), ["ExecuteReader", "SendAsync"]);
        assert_eq!(filter_by_caller(&once, "OtherApp"), once);

        let mine = filter_by_caller(&flat, "MyApp");
        assert_eq!(mine.len(), 3);
        assert_eq!(filter_by_caller(&mine, "MyApp"), mine);

        // case-sensitive
        assert_eq!(filter_by_caller(&flat, "myapp").len(), 2);
        // input untouched
        assert_eq!(flat.len(), 3);
    }

    #[test]
    fn by_target_requires_reference() {
        let flat = flatten_integrations(&catalog());
        let references = References(vec![("mscorlib", [4, 0, 0, 0]), ("System.Data", [4, 0, 0, 0])]);

        let kept = filter_by_target(&flat, &references);
        assert_eq!(method_names(&kept), ["ExecuteReader", "ExecuteScalar"]);
        assert!(kept
            .iter()
            .all(|method| method.replacement.target.assembly == "System.Data"));
    }

    #[test]
    fn by_target_checks_version() {
        let flat = flatten_integrations(&catalog());

        let too_new = References(vec![("System.Data", [5, 0, 0, 0])]);
        assert!(filter_by_target(&flat, &too_new).is_empty());

        let none = References(Vec::new());
        assert!(filter_by_target(&flat, &none).is_empty());
    }

    #[test]
    fn caller_method_restriction() {
        let mut restricted = (*rule(None, "System.Data", "ExecuteReader")).clone();
        restricted.caller.type_name = Some("MyApp.Repository".into());
        let methods = vec![IntegrationMethod {
            integration_name: Arc::from("AdoNet"),
            replacement: Arc::new(restricted),
        }];

        assert_eq!(replacements_for_caller(&methods, "MyApp.Repository", "Load").len(), 1);
        assert!(replacements_for_caller(&methods, "MyApp.Program", "Main").is_empty());
    }
}
