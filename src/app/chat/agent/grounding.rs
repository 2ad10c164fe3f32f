use crate::app::types::{Finding, GroundingDirective, SearchOutcome};
use crate::config::Locale;

/// Maps a search outcome to the one directive attached to the generation request
#[must_use]
pub fn inject(outcome: SearchOutcome) -> GroundingDirective {
    match outcome {
        SearchOutcome::Grounded { findings } => GroundingDirective::UseEvidence { findings },
        SearchOutcome::Empty => GroundingDirective::AdmitNoResult,
        SearchOutcome::Failed { .. } => GroundingDirective::AdmitSearchUnavailable,
        SearchOutcome::NotAttempted => GroundingDirective::None,
    }
}

/// System message carrying the directive, or `None` when no constraint applies
#[must_use]
pub fn directive_message(directive: &GroundingDirective, locale: Locale) -> Option<String> {
    match directive {
        GroundingDirective::UseEvidence { findings } => Some(evidence_message(findings, locale)),
        GroundingDirective::AdmitNoResult => Some(
            match locale {
                Locale::Zh => {
                    "⚠️ 重要：你刚才执行了搜索，但没有找到相关结果。\n\n\
                     你必须明确告知用户：'我搜索了相关信息，但没有找到准确的答案。'\n\n\
                     严格禁止：\n\
                     1. 绝对不能说\"根据搜索结果\"或\"搜索结果显示\"等话\n\
                     2. 绝对不能编造答案或假装找到了信息\n\n\
                     可以基于你自己的知识补充，但必须诚实说明这不是搜索结果。"
                }
                Locale::En => {
                    "IMPORTANT: A search was performed but returned no relevant results.\n\n\
                     You MUST tell the user: 'I searched for this, but could not find an accurate answer.'\n\n\
                     Strictly forbidden:\n\
                     1. Never say \"according to the search results\" or similar\n\
                     2. Never fabricate an answer or pretend information was found\n\n\
                     You may add what you know yourself, but say honestly that it is not from a search."
                }
            }
            .to_string(),
        ),
        GroundingDirective::AdmitSearchUnavailable => Some(
            match locale {
                Locale::Zh => {
                    "⚠️ 重要：搜索服务当前不可用。\n\n\
                     你必须明确告知用户：'抱歉，搜索功能暂时无法使用。'\n\n\
                     严格禁止：\n\
                     1. 绝对不能说\"我已经执行了搜索\"或\"我搜索了\"等话\n\
                     2. 绝对不能编造搜索结果"
                }
                Locale::En => {
                    "IMPORTANT: The search service is currently unavailable.\n\n\
                     You MUST tell the user: 'Sorry, search is temporarily unavailable.'\n\n\
                     Strictly forbidden:\n\
                     1. Never claim to have searched\n\
                     2. Never fabricate search results"
                }
            }
            .to_string(),
        ),
        GroundingDirective::None => None,
    }
}

fn evidence_message(findings: &[Finding], locale: Locale) -> String {
    let blocks = findings
        .iter()
        .map(|finding| render_finding(finding, locale))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n");
    match locale {
        Locale::Zh => format!(
            "⚠️ 强制要求：以下是联网搜索验证的结果（必须使用，禁止编造）。\n\n\
             {}\n\n\
             你必须：\n\
             1. 使用搜索结果中的信息回答用户的问题\n\
             2. 如果搜索结果包含歌词，你必须引用真实的歌词\n\
             3. 不能编造任何内容，事实性陈述必须基于搜索结果\n\
             4. 如果搜索结果不完整，明确说明，但必须使用已有的搜索结果\n\
             5. 禁止声称搜索了以上结果之外的内容",
            blocks
        ),
        Locale::En => format!(
            "MANDATORY: The following are verified web search results (use them, do not fabricate).\n\n\
             {}\n\n\
             You must:\n\
             1. Answer using the information in the search results\n\
             2. Quote real lyrics when the results contain lyrics\n\
             3. Ground every factual claim in the results; invent nothing\n\
             4. Say so when the results are incomplete, but still use them\n\
             5. Never claim to have searched beyond what is given here",
            blocks
        ),
    }
}

fn render_finding(finding: &Finding, locale: Locale) -> String {
    let (query_label, answer_label, title_label, content_label, source_label) = match locale {
        Locale::Zh => ("搜索查询", "答案", "标题", "内容", "来源"),
        Locale::En => ("Query", "Answer", "Title", "Content", "Source"),
    };
    let mut lines = vec![format!("{}: {}", query_label, finding.query)];
    if let Some(answer) = finding.answer.as_deref().filter(|answer| !answer.trim().is_empty()) {
        lines.push(format!("{}: {}", answer_label, answer));
        lines.extend(finding.snippets.iter().map(|snippet| {
            format!(
                "{}: {} ({})",
                match locale {
                    Locale::Zh => "参考来源",
                    Locale::En => "Reference",
                },
                snippet.title,
                snippet.source_url
            )
        }));
    } else {
        lines.extend(finding.snippets.iter().map(|snippet| {
            format!(
                "{}: {}\n{}: {}\n{}: {}",
                title_label,
                snippet.title,
                content_label,
                snippet.excerpt,
                source_label,
                snippet.source_url
            )
        }));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::types::Snippet;

    fn finding(query: &str, answer: Option<&str>) -> Finding {
        Finding {
            query: query.to_string(),
            answer: answer.map(str::to_string),
            snippets: vec![Snippet {
                title: "隐形人 - 孙燕姿".to_string(),
                excerpt: "我的爱 是隐形人".to_string(),
                source_url: "https://example.com/lyrics".to_string(),
            }],
        }
    }

    #[test]
    fn test_inject_is_total() {
        let grounded = SearchOutcome::Grounded {
            findings: vec![finding("q", Some("a"))],
        };
        assert!(matches!(inject(grounded), GroundingDirective::UseEvidence { .. }));
        assert_eq!(inject(SearchOutcome::Empty), GroundingDirective::AdmitNoResult);
        assert_eq!(
            inject(SearchOutcome::Failed {
                reason: "down".to_string()
            }),
            GroundingDirective::AdmitSearchUnavailable
        );
        assert_eq!(inject(SearchOutcome::NotAttempted), GroundingDirective::None);
    }

    #[test]
    fn test_evidence_message_keeps_candidate_order() {
        let directive = GroundingDirective::UseEvidence {
            findings: vec![finding("隐形人 歌词 lyrics", None), finding("孙燕姿", Some("新加坡歌手"))],
        };
        let message = directive_message(&directive, Locale::Zh).unwrap();

        let first = message.find("搜索查询: 隐形人 歌词 lyrics").unwrap();
        let second = message.find("搜索查询: 孙燕姿").unwrap();
        assert!(first < second);
        assert!(message.contains("内容: 我的爱 是隐形人"));
        assert!(message.contains("答案: 新加坡歌手"));
        assert!(message.contains("参考来源: 隐形人 - 孙燕姿 (https://example.com/lyrics)"));
        assert!(message.contains("禁止编造"));
    }

    #[test]
    fn test_admission_messages_forbid_claims() {
        let no_result = directive_message(&GroundingDirective::AdmitNoResult, Locale::En).unwrap();
        assert!(no_result.contains("could not find an accurate answer"));

        let unavailable =
            directive_message(&GroundingDirective::AdmitSearchUnavailable, Locale::Zh).unwrap();
        assert!(unavailable.contains("抱歉，搜索功能暂时无法使用"));
        assert!(!unavailable.contains("搜索查询"));

        assert_eq!(directive_message(&GroundingDirective::None, Locale::Zh), None);
    }
}
