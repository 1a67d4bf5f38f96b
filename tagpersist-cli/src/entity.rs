//! Sample entity persisted by the `save` command.

/// Body text of a news article, in stored and tag-stripped form
#[derive(Clone, PartialEq, prost::Message)]
pub struct ArticleText {
    #[prost(int64, tag = "1")]
    pub article_text_id: i64,
    #[prost(string, tag = "2")]
    pub article_id: String,
    #[prost(string, tag = "3")]
    pub article_text: String,
    #[prost(string, tag = "4")]
    pub no_html: String,
}

pub fn build_article(
    article_text_id: i64,
    article_id: String,
    article_text: String,
    no_html: Option<String>,
) -> ArticleText {
    let no_html = no_html.unwrap_or_else(|| strip_html(&article_text));
    ArticleText {
        article_text_id,
        article_id,
        article_text,
        no_html,
    }
}

/// Drop anything between `<` and `>` and collapse runs of whitespace.
pub fn strip_html(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => {
                in_tag = true;
                text.push(' ');
            }
            '>' if in_tag => in_tag = false,
            _ if !in_tag => text.push(ch),
            _ => {}
        }
    }
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_html() {
        assert_eq!(strip_html("<p>Hello <b>world</b></p>"), "Hello world");
        assert_eq!(strip_html("plain"), "plain");
        assert_eq!(strip_html("a<br/>b"), "a b");
        assert_eq!(strip_html(""), "");
    }

    #[test]
    fn test_build_article_derives_plain_text() {
        let article = build_article(3, "abc".into(), "<i>Staff</i> update".into(), None);
        assert_eq!(article.no_html, "Staff update");

        let explicit = build_article(3, "abc".into(), "<i>x</i>".into(), Some("given".into()));
        assert_eq!(explicit.no_html, "given");
    }
}
