use serde_json::Value;

use crate::skills::Skill;

pub const ANALYST_SYSTEM: &str = "You are a product analyst. You turn a raw project idea into a \
structured analysis. You answer with a single JSON object and nothing else. Be concrete: name \
the features a first version actually needs, not everything imaginable.";

pub const ARCHITECT_SYSTEM: &str = "You are a software architect. Given a product analysis you \
design the smallest architecture that ships. You answer with a single JSON object and nothing \
else. Respect the constraints you are given; do not introduce extra services or databases the \
project type does not call for.";

pub const DEVELOPER_SYSTEM: &str = "You are a senior developer working inside the project \
workspace. Use the available tools to create and edit files and run shell commands. Write \
complete, working files; never leave placeholders. Keep the Dockerfile exactly as specified.";

pub const DEBUGGER_SYSTEM: &str = "You are a build debugger. You receive deployment build logs \
for the project in the workspace. Find the root cause, fix it with the minimal change, and do \
not refactor unrelated code.";

pub const QA_SYSTEM: &str = "You are a QA reviewer. Inspect the project files read-only and \
report a short quality assessment: a score out of 10 and the concrete issues you found. Do not \
attempt to edit anything.";

/// User prompt for the Analysis phase.
pub fn analysis_prompt(description: &str) -> String {
    format!(
        "Analyse this project idea:\n\n\"{description}\"\n\n\
Reply with JSON only, in this shape:\n\
{{\n  \"name\": \"short-slug\",\n  \"summary\": \"one paragraph\",\n  \
\"type\": \"static|spa|fullstack|api|python-worker|node-worker\",\n  \
\"features\": [\"...\"],\n  \"userStories\": [\"...\"],\n  \
\"stack\": {{\"frontend\": \"...\", \"backend\": \"...\"}},\n  \
\"targetAudience\": \"...\"\n}}"
    )
}

/// User prompt for the Architecture phase.
pub fn architecture_prompt(
    analysis: &Value,
    dockerfile: &str,
    guidance: &str,
    skills: &[Skill],
) -> String {
    let mut s = format!(
        "Design the architecture for this project.\n\nAnalysis:\n{}\n\n\
Constraints:\n{guidance}\n\nThe deployment Dockerfile will be:\n```\n{dockerfile}```\n",
        serde_json::to_string_pretty(analysis).unwrap_or_default(),
    );
    if !skills.is_empty() {
        s.push_str("\nRelevant skills you may lean on:\n");
        for skill in skills {
            s.push_str(&format!("- {} ({})\n", skill.title, skill.href));
        }
    }
    s.push_str(
        "\nReply with JSON only:\n{\n  \"stack\": {...},\n  \"fileStructure\": [\"...\"],\n  \
\"endpoints\": [...],\n  \"features\": [\"...\"]\n}",
    );
    s
}

/// User prompt for the Scaffold phase.
pub fn scaffold_prompt(architecture: &Value, guidance: &str, dockerfile: &str) -> String {
    format!(
        "Create the initial project skeleton in the workspace.\n\n\
Architecture:\n{}\n\nFiles to create:\n{guidance}\n\n\
The Dockerfile must match this template exactly:\n```\n{dockerfile}```\n\
Never use shell-style redirections (>, >>, |) inside COPY or any other Dockerfile \
instruction. Create every file listed, with real working content.",
        serde_json::to_string_pretty(architecture).unwrap_or_default(),
    )
}

/// User prompt for one Development feature.
pub fn feature_prompt(feature: &str, architecture: &Value) -> String {
    format!(
        "Implement this feature completely: {feature}\n\n\
Project architecture for reference:\n{}\n\n\
Edit the existing files rather than rewriting the project. Keep the Dockerfile untouched. \
Make sure the project still builds after your changes.",
        serde_json::to_string_pretty(architecture).unwrap_or_default(),
    )
}

/// User prompt for the Debugger after a failed build.
pub fn debug_prompt(logs: &str) -> String {
    format!(
        "The deployment build failed. Build logs:\n\n```\n{logs}\n```\n\n\
Find the cause in the workspace files and fix it. Keep the change minimal."
    )
}

/// User prompt for the QA pass.
pub fn qa_prompt() -> String {
    "Review the project in the workspace. List the files, read the important ones, and reply \
with a short report: score /10, issues found, and whether the Dockerfile matches the project \
layout."
        .to_string()
}

/// User prompt for an out-of-band modification request.
pub fn modify_prompt(instructions: &str) -> String {
    format!(
        "Apply this modification to the existing project:\n\n{instructions}\n\n\
Edit only what the request requires and keep everything else working."
    )
}
