use crate::parsing::languages::TSLanguageConfig;

pub fn typescript_language_config() -> TSLanguageConfig {
    TSLanguageConfig {
        language_ids: &["Typescript", "TSX", "typescript", "tsx"],
        file_extensions: &["ts", "tsx"],
        grammar: tree_sitter_typescript::language_tsx,
        symbol_query: vec![
            "(method_definition name: (property_identifier) @method.name) @method.body".to_owned(),
            "(function_declaration name: (identifier) @function.name) @function.body".to_owned(),
            "(generator_function_declaration name: (identifier) @function.name) @function.body"
                .to_owned(),
            "(lexical_declaration
                (variable_declarator
                    name: (identifier) @function.name
                    value: (arrow_function)))
            @function.body"
                .to_owned(),
            "(class_declaration name: (type_identifier) @class.name) @class.body".to_owned(),
            "(interface_declaration name: (type_identifier) @interface.name) @interface.body"
                .to_owned(),
            "(enum_declaration name: (identifier) @enum.name) @enum.body".to_owned(),
            "(enum_body (property_identifier) @enum_member.name @enum_member.body)".to_owned(),
            "(enum_assignment name: (property_identifier) @enum_member.name) @enum_member.body"
                .to_owned(),
            "(internal_module name: (identifier) @namespace.name) @namespace.body".to_owned(),
            "(public_field_definition name: (property_identifier) @property.name) @property.body"
                .to_owned(),
        ],
    }
}
