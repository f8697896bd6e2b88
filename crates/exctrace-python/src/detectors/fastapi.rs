//! FastAPI/Starlette shaped pattern configuration.

use super::{
    ClassRoutePattern, DecoratorRoutePattern, FrameworkConfig, HandlerPattern, MethodSource,
    RegistrationCallPattern,
};

pub fn config() -> FrameworkConfig {
    FrameworkConfig {
        name: "fastapi",
        decorator_routes: vec![DecoratorRoutePattern {
            attribute_names: vec!["get", "post", "put", "delete", "patch"],
            path_keyword: "path",
            method_source: MethodSource::FromAttribute,
        }],
        class_routes: vec![ClassRoutePattern {
            base_names: vec!["APIRouter", "ViewSet"],
            http_methods: vec!["get", "post", "put", "delete", "patch"],
        }],
        registration_calls: vec![RegistrationCallPattern {
            call_attribute: "include_router",
            http_methods: vec!["get", "post", "put", "delete", "patch"],
        }],
        handlers: vec![HandlerPattern {
            decorator_attribute: None,
            call_attribute: Some("add_exception_handler"),
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_names_itself_fastapi() {
        assert_eq!(config().name, "fastapi");
    }
}
