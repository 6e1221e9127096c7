use crate::parsing::languages::TSLanguageConfig;

pub fn python_language_config() -> TSLanguageConfig {
    TSLanguageConfig {
        language_ids: &["Python", "python"],
        file_extensions: &["py"],
        grammar: tree_sitter_python::language,
        symbol_query: vec![
            // functions declared inside a class block are methods, decorated
            // or not; __init__ gets reclassified as a constructor later
            "(class_definition body: (block
                (function_definition name: (identifier) @method.name) @method.body))"
                .to_owned(),
            "(class_definition body: (block
                (decorated_definition
                    definition: (function_definition name: (identifier) @method.name))
                @method.body))"
                .to_owned(),
            "(module
                (function_definition name: (identifier) @function.name) @function.body)"
                .to_owned(),
            "(module
                (decorated_definition
                    definition: (function_definition name: (identifier) @function.name))
                @function.body)"
                .to_owned(),
            "(class_definition name: (identifier) @class.name) @class.body".to_owned(),
        ],
    }
}
