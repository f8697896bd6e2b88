//! Flask/Flask-RESTful shaped pattern configuration.

use super::{
    ClassRoutePattern, DecoratorRoutePattern, FrameworkConfig, HandlerPattern, MethodSource,
    RegistrationCallPattern,
};

pub fn config() -> FrameworkConfig {
    FrameworkConfig {
        name: "flask",
        decorator_routes: vec![
            DecoratorRoutePattern {
                attribute_names: vec!["get", "post", "put", "delete", "patch"],
                path_keyword: "rule",
                method_source: MethodSource::FromAttribute,
            },
            DecoratorRoutePattern {
                attribute_names: vec!["route"],
                path_keyword: "rule",
                method_source: MethodSource::Keyword("methods"),
            },
        ],
        class_routes: vec![ClassRoutePattern {
            base_names: vec!["APIView", "MethodView", "Resource"],
            http_methods: vec!["get", "post", "put", "delete", "patch"],
        }],
        registration_calls: vec![RegistrationCallPattern {
            call_attribute: "add_resource",
            http_methods: vec!["get", "post", "put", "delete", "patch"],
        }],
        handlers: vec![HandlerPattern {
            decorator_attribute: Some("errorhandler"),
            call_attribute: Some("register_error_handler"),
        }],
    }
}
